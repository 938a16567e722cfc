//! HTML rendering
//!
//! Plain server-rendered pages. Every interpolated value goes through
//! [`escape`], and only `http`/`https` evidence links become anchors.

use crate::sessions::{Flash, FlashKind};
use opsflow_core::{
    AuditRecord, Department, Evidence, LockDraft, Routine, TaskInstance, UserProfile,
};
use std::fmt::Write;

/// Escape text for HTML element and attribute content
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn document(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\"><head><meta charset=\"utf-8\">\
         <title>{} - OpsFlow</title></head><body>{body}</body></html>",
        escape(title)
    )
}

fn dashboard(title: &str, profile: &UserProfile, flash: Option<&Flash>, main: &str) -> String {
    let mut nav = String::from(
        "<nav><a href=\"/dashboard/shift-hub\">Shift Hub</a>",
    );
    if profile.role.can_administer() {
        nav.push_str(" <a href=\"/dashboard/admin-panel\">Admin Panel</a>");
    }
    nav.push_str(" <a href=\"/dashboard/audit-ledger\">Audit Ledger</a></nav>");

    let body = format!(
        "<header><h1>OpsFlow</h1>{nav}\
         <p class=\"who\">Logged in as {} ({}, {})</p>\
         <form method=\"post\" action=\"/logout\"><button type=\"submit\">Logout</button></form>\
         </header>{}<main><h2>{}</h2>{main}</main>",
        escape(profile.display_name()),
        escape(profile.role.as_str()),
        escape(&profile.department),
        flash_html(flash),
        escape(title),
    );
    document(title, &body)
}

fn flash_html(flash: Option<&Flash>) -> String {
    match flash {
        Some(flash) => {
            let class = match flash.kind {
                FlashKind::Success => "flash success",
                FlashKind::Error => "flash error",
            };
            format!("<p class=\"{class}\" role=\"status\">{}</p>", escape(&flash.message))
        }
        None => String::new(),
    }
}

fn error_html(error: Option<&str>) -> String {
    error.map_or_else(String::new, |e| {
        format!("<p class=\"flash error\" role=\"alert\">{}</p>", escape(e))
    })
}

/// Login page
#[must_use]
pub fn login(notice: Option<&str>, error: Option<&str>, email: &str) -> String {
    let notice = notice.map_or_else(String::new, |n| {
        format!("<p class=\"notice\">{}</p>", escape(n))
    });
    let body = format!(
        "<h1>OpsFlow</h1>{notice}{}\
         <form method=\"post\" action=\"/login\">\
         <label>Email <input type=\"email\" name=\"email\" value=\"{}\" required></label>\
         <label>Password <input type=\"password\" name=\"password\" required></label>\
         <button type=\"submit\">Login</button></form>\
         <p><a href=\"/register\">Create an account</a></p>",
        error_html(error),
        escape(email),
    );
    document("Login", &body)
}

/// Registration page
#[must_use]
pub fn register(departments: &[String], error: Option<&str>, selected: &str) -> String {
    let mut options = String::new();
    for name in departments {
        let chosen = if name == selected { " selected" } else { "" };
        let _ = write!(
            options,
            "<option value=\"{0}\"{chosen}>{0}</option>",
            escape(name)
        );
    }
    let body = format!(
        "<h1>OpsFlow</h1>{}\
         <form method=\"post\" action=\"/register\">\
         <label>Full name <input name=\"full_name\" required></label>\
         <label>Email <input type=\"email\" name=\"email\" required></label>\
         <label>Password <input type=\"password\" name=\"password\" required></label>\
         <label>Department <select name=\"department\">{options}</select></label>\
         <button type=\"submit\">Register</button></form>\
         <p><a href=\"/login\">Back to login</a></p>",
        error_html(error),
    );
    document("Register", &body)
}

/// Registration confirmation
#[must_use]
pub fn registered() -> String {
    document(
        "Registered",
        "<h1>OpsFlow</h1><p>Registration successful. Check your email to confirm \
         your account, then <a href=\"/login\">log in</a>.</p>",
    )
}

/// Shift hub contents
#[derive(Debug)]
pub struct ShiftHubView<'a> {
    /// Caller
    pub profile: &'a UserProfile,
    /// Today's tasks
    pub tasks: &'a [TaskInstance],
    /// Caller's draft
    pub draft: &'a LockDraft,
    /// Flash message
    pub flash: Option<&'a Flash>,
    /// Cutoff hour, when the shift has ended
    pub shift_ended_at: Option<u32>,
    /// Task list could not be loaded
    pub load_error: Option<&'a str>,
}

/// Shift hub page
#[must_use]
pub fn shift_hub(view: &ShiftHubView<'_>) -> String {
    let mut main = String::new();
    if let Some(end_hour) = view.shift_ended_at {
        let _ = write!(
            main,
            "<p class=\"notice\">Shift ended at {end_hour:02}:00. No new locks allowed.</p>"
        );
    }
    main.push_str(&error_html(view.load_error));

    let selected = view.draft.task_id();
    main.push_str(
        "<table class=\"tasks\"><thead><tr><th>Task</th><th>Routine</th><th>Scheduled</th>\
         <th>Status</th><th>TAT</th><th></th></tr></thead><tbody>",
    );
    if view.tasks.is_empty() && view.load_error.is_none() {
        main.push_str("<tr><td colspan=\"6\">No tasks scheduled today</td></tr>");
    }
    for task in view.tasks {
        let tat = match (task.tat_actual_minutes, task.is_breached()) {
            (Some(m), true) => format!("{m}min <strong class=\"breach\">BREACH</strong>"),
            (Some(m), false) => format!("{m}min"),
            (None, _) => String::new(),
        };
        let action = if task.is_locked() {
            "<span class=\"locked\">Locked</span>".to_string()
        } else {
            format!(
                "<form method=\"post\" action=\"/dashboard/shift-hub/select\">\
                 <input type=\"hidden\" name=\"task_id\" value=\"{}\">\
                 <button type=\"submit\">Select</button></form>",
                escape(task.id.as_str())
            )
        };
        let class = if selected == Some(&task.id) { " class=\"selected\"" } else { "" };
        let _ = write!(
            main,
            "<tr{class}><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{tat}</td><td>{action}</td></tr>",
            escape(task.id.as_str()),
            escape(task.routine_id.as_str()),
            task.scheduled_time.format("%H:%M UTC"),
            task.status,
        );
    }
    main.push_str("</tbody></table>");

    if let Some(task) = selected.and_then(|id| view.tasks.iter().find(|t| &t.id == id)) {
        main.push_str(&task_panel(task, view.draft, view.shift_ended_at.is_some()));
    }

    dashboard("Shift Hub", view.profile, view.flash, &main)
}

fn task_panel(task: &TaskInstance, draft: &LockDraft, shift_ended: bool) -> String {
    let mut panel = format!(
        "<section class=\"task-panel\"><h3>Task {} ({})</h3>",
        escape(task.id.as_str()),
        escape(task.routine_id.as_str())
    );

    if task.is_locked() {
        let _ = write!(
            panel,
            "<p>This task is locked and can no longer be edited.</p><p>{}</p>",
            escape(task.commentary.as_deref().unwrap_or(""))
        );
        panel.push_str(&evidence_list(task.evidence.links(), false));
        panel.push_str("</section>");
        return panel;
    }

    let _ = write!(
        panel,
        "<form method=\"post\" action=\"/dashboard/shift-hub/commentary\">\
         <label>Commentary <textarea name=\"commentary\">{}</textarea></label>\
         <label>Evidence link <input type=\"url\" name=\"evidence_link\"></label>\
         <button type=\"submit\" formaction=\"/dashboard/shift-hub/evidence/add\">Add evidence</button>\
         <button type=\"submit\">Save draft</button>",
        escape(draft.commentary())
    );
    panel.push_str(&evidence_list(draft.evidence().links(), true));
    let disabled = if shift_ended || draft.is_locking() { " disabled" } else { "" };
    let _ = write!(
        panel,
        "<button type=\"submit\" formaction=\"/dashboard/shift-hub/lock\"{disabled}>Lock task</button>\
         </form></section>"
    );
    panel
}

fn evidence_list(links: &[String], removable: bool) -> String {
    if links.is_empty() {
        return String::new();
    }
    let mut list = String::from("<ul class=\"evidence\">");
    for (index, link) in links.iter().enumerate() {
        let text = escape(link);
        if Evidence::is_web_link(link) {
            let _ = write!(list, "<li><a href=\"{text}\" rel=\"noopener noreferrer\">{text}</a>");
        } else {
            // rows written by other clients are shown but never linked
            let _ = write!(list, "<li><span class=\"unlinked\">{text}</span>");
        }
        if removable {
            let _ = write!(
                list,
                " <button type=\"submit\" name=\"index\" value=\"{index}\" \
                 formaction=\"/dashboard/shift-hub/evidence/remove\">Remove</button>"
            );
        }
        list.push_str("</li>");
    }
    list.push_str("</ul>");
    list
}

/// Admin panel tabs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminTab {
    /// Routine list and form
    #[default]
    Routines,
    /// Department list and form
    Departments,
}

impl AdminTab {
    /// Tab named in `?tab=`
    #[must_use]
    pub fn from_query(tab: Option<&str>) -> Self {
        match tab {
            Some("departments") => Self::Departments,
            _ => Self::Routines,
        }
    }

    /// Query value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routines => "routines",
            Self::Departments => "departments",
        }
    }
}

/// Admin panel page
#[must_use]
pub fn admin_panel(
    profile: &UserProfile,
    tab: AdminTab,
    routines: &[Routine],
    departments: &[Department],
    flash: Option<&Flash>,
) -> String {
    let mut main = String::from(
        "<p><a href=\"/dashboard/admin-panel?tab=routines\">Routines</a> \
         <a href=\"/dashboard/admin-panel?tab=departments\">Departments</a></p>",
    );
    match tab {
        AdminTab::Routines => main.push_str(&routines_tab(routines, departments)),
        AdminTab::Departments => main.push_str(&departments_tab(departments)),
    }
    dashboard("Admin Panel", profile, flash, &main)
}

const CONFIRM_LABEL: &str = "Are you sure? This cannot be undone.";

fn delete_form(action: &str, id: &str) -> String {
    format!(
        "<form method=\"post\" action=\"{action}\">\
         <input type=\"hidden\" name=\"id\" value=\"{}\">\
         <label><input type=\"checkbox\" name=\"confirm\" value=\"yes\" required> {CONFIRM_LABEL}</label>\
         <button type=\"submit\">Delete</button></form>",
        escape(id)
    )
}

fn routines_tab(routines: &[Routine], departments: &[Department]) -> String {
    let mut options = String::new();
    for department in departments {
        let _ = write!(
            options,
            "<option value=\"{}\">{}</option>",
            escape(department.id.as_str()),
            escape(&department.name)
        );
    }
    let mut html = format!(
        "<form method=\"post\" action=\"/dashboard/admin-panel/routines\">\
         <label>Routine ID (OPS-*) <input name=\"id\" placeholder=\"OPS-CASH-001\"></label>\
         <label>Name <input name=\"name\"></label>\
         <label>Department <select name=\"department_id\"><option value=\"\"></option>{options}</select></label>\
         <label>Frequency <select name=\"frequency\"><option>Daily</option><option>Weekdays</option></select></label>\
         <label>Repeat interval (min) <input type=\"number\" name=\"repeat_interval_minutes\" value=\"60\"></label>\
         <label>Start <input type=\"time\" name=\"start_time\" value=\"08:00\"></label>\
         <label>End <input type=\"time\" name=\"end_time\" value=\"17:00\"></label>\
         <label>TAT (min) <input type=\"number\" name=\"tat_minutes\" value=\"45\"></label>\
         <label>Description <textarea name=\"description\"></textarea></label>\
         <button type=\"submit\">Create routine</button></form>\
         <table class=\"routines\"><thead><tr><th>ID</th><th>Name</th><th>Department</th>\
         <th>Frequency</th><th>Window</th><th>TAT</th><th></th></tr></thead><tbody>"
    );
    for routine in routines {
        let window = match (routine.start_time, routine.end_time) {
            (Some(start), Some(end)) => format!("{start}-{end}"),
            _ => String::new(),
        };
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{window}</td><td>{}min</td><td>{}</td></tr>",
            escape(routine.id.as_str()),
            escape(&routine.name),
            escape(routine.department_id.as_str()),
            routine.frequency,
            routine.tat_minutes,
            delete_form("/dashboard/admin-panel/routines/delete", routine.id.as_str()),
        );
    }
    html.push_str("</tbody></table>");
    html
}

fn departments_tab(departments: &[Department]) -> String {
    let mut html = String::from(
        "<form method=\"post\" action=\"/dashboard/admin-panel/departments\">\
         <label>Name <input name=\"name\" placeholder=\"e.g., Disbursement\"></label>\
         <label>Description <textarea name=\"description\"></textarea></label>\
         <label>Opens <input type=\"time\" name=\"operating_hours_start\" value=\"08:00\"></label>\
         <label>Closes <input type=\"time\" name=\"operating_hours_end\" value=\"17:00\"></label>\
         <button type=\"submit\">Create department</button></form>\
         <table class=\"departments\"><thead><tr><th>Name</th><th>Description</th><th>Hours</th>\
         <th></th></tr></thead><tbody>",
    );
    for department in departments {
        let hours = match (department.operating_hours_start, department.operating_hours_end) {
            (Some(start), Some(end)) => format!("{start}-{end}"),
            _ => String::new(),
        };
        let _ = write!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{hours}</td><td>{}</td></tr>",
            escape(&department.name),
            escape(department.description.as_deref().unwrap_or("")),
            delete_form("/dashboard/admin-panel/departments/delete", department.id.as_str()),
        );
    }
    html.push_str("</tbody></table>");
    html
}

/// Audit ledger page
#[must_use]
pub fn audit_ledger(profile: &UserProfile, records: &[AuditRecord], error: Option<&str>) -> String {
    let mut main = error_html(error);
    main.push_str(
        "<table class=\"audit\"><thead><tr><th>When</th><th>Task</th><th>Action</th>\
         <th>Actor</th><th>Role</th><th>TAT</th><th>Breach</th></tr></thead><tbody>",
    );
    for record in records {
        let _ = write!(
            main,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}min</td><td>{}</td></tr>",
            record
                .created_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_default(),
            escape(record.task_id.as_str()),
            record.action,
            record.actor_id.map(|id| id.to_string()).unwrap_or_default(),
            record.actor_role.map(|r| r.as_str()).unwrap_or(""),
            record.details.tat_actual_minutes,
            if record.details.tat_breached { "yes" } else { "no" },
        );
    }
    main.push_str("</tbody></table>");
    dashboard("Audit Ledger", profile, None, &main)
}
