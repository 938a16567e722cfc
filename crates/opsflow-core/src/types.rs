//! Core types for OpsFlow
//!
//! Typed records for every table the hosted backend exposes:
//! - `users` profiles and roles
//! - `departments` and `routines` reference data
//! - `task_instances` with their lock metrics
//! - `audit_ledger` entries
//!
//! Rows are decoded into these records at the data-access boundary; a row
//! that does not fit is rejected rather than passed through untyped.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Accepts a JSON string or integer and yields its text form
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Signed(n) => n.to_string(),
        Raw::Unsigned(n) => n.to_string(),
    })
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a raw identifier
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier text
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                string_or_number(deserializer).map(Self)
            }
        }
    };
}

string_id!(
    /// Task instance identifier
    TaskId
);
string_id!(
    /// Routine code, e.g. `OPS-CASH-001`
    RoutineId
);
string_id!(
    /// Department identifier
    DepartmentId
);
string_id!(
    /// Audit ledger row identifier
    AuditId
);

/// Auth identity id (the hosted auth service issues UUIDs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Generate a fresh identity id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bearer token for the hosted backend. Never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the `Authorization` header
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl<'de> Deserialize<'de> for AccessToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// Long-lived token used to renew an [`AccessToken`]. Never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RefreshToken(String);

impl RefreshToken {
    /// Wrap a raw token
    #[inline]
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the refresh grant
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken(***)")
    }
}

impl<'de> Deserialize<'de> for RefreshToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// Timestamp columns. `timestamptz` values carry an offset; plain
/// `timestamp` values do not and are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .or_else(|_| {
                DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z")
                    .map(|t| t.with_timezone(&Utc))
            })
            .ok()
            .or_else(|| {
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                    .iter()
                    .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                    .map(|naive| naive.and_utc())
            })
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw:?}")))
    }

    pub(super) mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer};

        pub(in super::super) fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp: {raw:?}"))
                }),
            }
        }
    }
}

/// Operator roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Shift operator
    #[default]
    Operator,
    /// Department admin
    Admin,
    /// Global admin
    SuperAdmin,
}

impl Role {
    /// Stored representation
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    /// Check if this role may use the admin panel
    #[inline]
    #[must_use]
    pub fn can_administer(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task instance status. `Pending -> Locked` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Awaiting lock
    #[default]
    Pending,
    /// Locked and immutable
    Locked,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("Pending"),
            TaskStatus::Locked => f.write_str("Locked"),
        }
    }
}

/// Routine cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Frequency {
    /// Every day
    #[default]
    Daily,
    /// Monday to Friday
    Weekdays,
}

impl Frequency {
    /// Stored representation
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Weekdays => "Weekdays",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Daily" => Ok(Frequency::Daily),
            "Weekdays" => Ok(Frequency::Weekdays),
            other => Err(other.to_string()),
        }
    }
}

/// Time of day for schedules and operating hours.
///
/// Reads `HH:MM` (form input) and `HH:MM:SS` (Postgres `time`), writes `HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(NaiveTime);

impl ClockTime {
    /// Build from hour and minute
    #[inline]
    #[must_use]
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// Parse `HH:MM` or `HH:MM:SS[.fff]`
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        NaiveTime::parse_from_str(input, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(input, "%H:%M"))
            .ok()
            .map(Self)
    }

    /// Underlying time
    #[inline]
    #[must_use]
    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.format("%H:%M:%S").to_string())
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ClockTime::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {raw:?}")))
    }
}

/// Evidence links attached to a lock.
///
/// Persisted as a JSON-encoded array inside a text column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evidence(Vec<String>);

impl Evidence {
    /// Empty list
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from links, skipping anything [`Evidence::add`] refuses
    #[must_use]
    pub fn from_links<I, S>(links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut evidence = Self::new();
        for link in links {
            evidence.add(link.as_ref());
        }
        evidence
    }

    /// Append a link. Anything but an `http`/`https` URL is ignored and
    /// reported as `false`.
    pub fn add(&mut self, link: &str) -> bool {
        let link = link.trim();
        if !Self::is_web_link(link) {
            return false;
        }
        self.0.push(link.to_string());
        true
    }

    /// Check if `link` is an absolute `http`/`https` URL with a host part
    #[must_use]
    pub fn is_web_link(link: &str) -> bool {
        let link = link.trim();
        let rest = ["https://", "http://"].iter().find_map(|scheme| {
            link.get(..scheme.len())
                .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
                .map(|_| &link[scheme.len()..])
        });
        rest.is_some_and(|rest| {
            !rest.is_empty() && !rest.starts_with('/') && !rest.chars().any(char::is_whitespace)
        })
    }

    /// Remove the link at `index`; out of range is a no-op
    pub fn remove(&mut self, index: usize) -> Option<String> {
        (index < self.0.len()).then(|| self.0.remove(index))
    }

    /// Links in insertion order
    #[inline]
    #[must_use]
    pub fn links(&self) -> &[String] {
        &self.0
    }

    /// Number of links
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no links
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// JSON array text, as stored in the `evidence` column
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::Value::from(self.0.clone()).to_string()
    }

    /// Decode the stored JSON array text
    pub fn from_json(encoded: &str) -> Result<Self, serde_json::Error> {
        if encoded.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str::<Vec<String>>(encoded).map(Self)
    }
}

impl Serialize for Evidence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_json())
    }
}

impl<'de> Deserialize<'de> for Evidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Encoded(String),
            Links(Vec<String>),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(Self::new()),
            Some(Raw::Links(links)) => Ok(Self(links)),
            Some(Raw::Encoded(text)) => Self::from_json(&text).map_err(serde::de::Error::custom),
        }
    }
}

/// Identity returned by the auth service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    /// Identity id
    pub id: UserId,
    /// Sign-in email
    #[serde(default)]
    pub email: Option<String>,
}

/// Result of a password sign-in
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    /// Bearer token for subsequent calls
    pub access_token: AccessToken,
    /// Refresh token, if issued
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// Token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Signed-in identity
    pub user: Identity,
}

/// Sign-up request
#[derive(Clone)]
pub struct SignUp {
    /// Sign-in email
    pub email: String,
    /// Password
    pub password: String,
    /// Display name (user metadata)
    pub full_name: String,
    /// Department name (user metadata)
    pub department: String,
}

impl fmt::Debug for SignUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUp")
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("department", &self.department)
            .finish_non_exhaustive()
    }
}

/// `users` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Identity id
    pub id: UserId,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Display name
    #[serde(default)]
    pub full_name: Option<String>,
    /// Department name; task instances are scoped by it
    pub department: String,
    /// Role
    #[serde(default)]
    pub role: Role,
}

impl UserProfile {
    /// Name to show in the header
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("operator")
    }
}

/// `departments` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    /// Identifier
    pub id: DepartmentId,
    /// Name
    pub name: String,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Operating hours start
    #[serde(default)]
    pub operating_hours_start: Option<ClockTime>,
    /// Operating hours end
    #[serde(default)]
    pub operating_hours_end: Option<ClockTime>,
}

fn default_true() -> bool {
    true
}

/// `routines` row: the task template that defines the SLA clock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    /// Routine code
    pub id: RoutineId,
    /// Name
    pub name: String,
    /// Owning department
    pub department_id: DepartmentId,
    /// Cadence
    #[serde(default)]
    pub frequency: Frequency,
    /// Minutes between repeats
    #[serde(default)]
    pub repeat_interval_minutes: Option<i64>,
    /// Window start
    #[serde(default)]
    pub start_time: Option<ClockTime>,
    /// Window end
    #[serde(default)]
    pub end_time: Option<ClockTime>,
    /// TAT threshold in minutes
    pub tat_minutes: i64,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Creating admin
    #[serde(default)]
    pub created_by: Option<UserId>,
    /// Whether the scheduler still instantiates it
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// `task_instances` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Identifier
    pub id: TaskId,
    /// Template routine
    pub routine_id: RoutineId,
    /// Department name
    pub department: String,
    /// When the task was due to start
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub scheduled_time: DateTime<Utc>,
    /// Status
    #[serde(default)]
    pub status: TaskStatus,
    /// Operator commentary, set on lock
    #[serde(default)]
    pub commentary: Option<String>,
    /// Evidence links, set on lock
    #[serde(default)]
    pub evidence: Evidence,
    /// Locking operator
    #[serde(default)]
    pub assigned_operator: Option<UserId>,
    /// When the lock happened
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub locked_time: Option<DateTime<Utc>>,
    /// Measured TAT
    #[serde(default)]
    pub tat_actual_minutes: Option<i64>,
    /// Whether the TAT exceeded the routine threshold
    #[serde(default)]
    pub tat_breached: Option<bool>,
}

impl TaskInstance {
    /// Build a pending task
    #[must_use]
    pub fn pending(
        id: impl Into<String>,
        routine_id: impl Into<String>,
        department: impl Into<String>,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(id),
            routine_id: RoutineId::new(routine_id),
            department: department.into(),
            scheduled_time,
            status: TaskStatus::Pending,
            commentary: None,
            evidence: Evidence::new(),
            assigned_operator: None,
            locked_time: None,
            tat_actual_minutes: None,
            tat_breached: None,
        }
    }

    /// Check if the task is locked (and therefore read-only)
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.status == TaskStatus::Locked
    }

    /// Check if the recorded TAT breached the SLA
    #[inline]
    #[must_use]
    pub fn is_breached(&self) -> bool {
        self.tat_breached.unwrap_or(false)
    }
}

/// Audit actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    /// Task locked
    Locked,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::Locked => f.write_str("Locked"),
        }
    }
}

/// Audit payload for a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDetails {
    /// Measured TAT
    pub tat_actual_minutes: i64,
    /// Breach flag
    pub tat_breached: bool,
}

/// `audit_ledger` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Identifier
    #[serde(default)]
    pub id: Option<AuditId>,
    /// Affected task
    pub task_id: TaskId,
    /// Action label
    pub action: AuditAction,
    /// Acting operator
    #[serde(default)]
    pub actor_id: Option<UserId>,
    /// Actor's role at the time
    #[serde(default)]
    pub actor_role: Option<Role>,
    /// Payload
    pub details: AuditDetails,
    /// Insert time
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Audit row to append
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAuditRecord {
    /// Affected task
    pub task_id: TaskId,
    /// Action label
    pub action: AuditAction,
    /// Acting operator
    pub actor_id: UserId,
    /// Actor's role
    pub actor_role: Role,
    /// Payload
    pub details: AuditDetails,
}

/// Column values written to a task row on lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskLockUpdate {
    /// Always `Locked`
    pub status: TaskStatus,
    /// Commentary
    pub commentary: String,
    /// Evidence, serialized as JSON text
    pub evidence: Evidence,
    /// Locking operator
    pub assigned_operator: UserId,
    /// Lock time
    pub locked_time: DateTime<Utc>,
    /// Measured TAT
    pub tat_actual_minutes: i64,
    /// Breach flag
    pub tat_breached: bool,
}

/// Task update plus its audit row, committed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockCommit {
    /// Task being locked
    pub task_id: TaskId,
    /// Column values for the task row
    pub update: TaskLockUpdate,
    /// Audit row
    pub audit: NewAuditRecord,
}

/// Routine row to insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRoutine {
    /// Routine code
    pub id: RoutineId,
    /// Name
    pub name: String,
    /// Owning department
    pub department_id: DepartmentId,
    /// Cadence
    pub frequency: Frequency,
    /// Minutes between repeats
    pub repeat_interval_minutes: i64,
    /// Window start
    pub start_time: ClockTime,
    /// Window end
    pub end_time: ClockTime,
    /// TAT threshold in minutes
    pub tat_minutes: i64,
    /// Description
    pub description: String,
    /// Creating admin
    pub created_by: UserId,
    /// Always `true` on create
    pub is_active: bool,
}

/// Department row to insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewDepartment {
    /// Name
    pub name: String,
    /// Description
    pub description: String,
    /// Operating hours start
    pub operating_hours_start: ClockTime,
    /// Operating hours end
    pub operating_hours_end: ClockTime,
}
