// Field validation per step.

use std::sync::Arc;

use crate::database::descriptor::ConnectionDescriptor;
use crate::models::config::{AdminAccount, NotificationSettings, TelephonySettings, ToolSettings};
use crate::models::messages::StepMessage;
use crate::models::options::{language_by_id, EXPORT_FONTS};
use crate::utils::validation::{
    validate_database_name, validate_host, validate_range, validate_required, EmailFormat,
    MinLength, StrongPassword, TextValidator,
};

pub const USER_LOGIN_MINIMUM_LENGTH: usize = 4;
pub const USER_PASSWORD_MINIMUM_LENGTH: usize = 8;

/// Rules for the administrator account. Each field check is swappable.
#[derive(Clone)]
pub struct AccountPolicy {
    pub username: Arc<dyn TextValidator>,
    pub password: Arc<dyn TextValidator>,
    pub email: Arc<dyn TextValidator>,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            username: Arc::new(MinLength {
                label: "Username",
                min: USER_LOGIN_MINIMUM_LENGTH,
            }),
            password: Arc::new(StrongPassword {
                min: USER_PASSWORD_MINIMUM_LENGTH,
            }),
            email: Arc::new(EmailFormat),
        }
    }
}

fn push_err(out: &mut Vec<StepMessage>, field: &str, result: anyhow::Result<()>) {
    if let Err(e) = result {
        out.push(StepMessage::error(Some(field), e.to_string()));
    }
}

pub fn validate_database(d: &ConnectionDescriptor) -> Vec<StepMessage> {
    let mut out = Vec::new();
    if d.dialect.is_embedded() {
        push_err(&mut out, "database", validate_required("Database file", &d.database));
        return out;
    }
    push_err(&mut out, "host", validate_host(&d.host));
    if d.port == 0 {
        out.push(StepMessage::error(Some("port"), "Port is required"));
    }
    push_err(&mut out, "database", validate_database_name(&d.database));
    push_err(&mut out, "login", validate_required("Login", &d.login));
    out
}

pub fn validate_account(a: &AdminAccount, policy: &AccountPolicy) -> Vec<StepMessage> {
    let mut out = Vec::new();
    push_err(&mut out, "username", policy.username.validate(&a.username));
    push_err(&mut out, "password", policy.password.validate(&a.password));
    let user = a.username.trim().to_lowercase();
    if !user.is_empty() && a.password.to_lowercase().contains(&user) {
        out.push(StepMessage::error(
            Some("password"),
            "Password must not contain the username",
        ));
    }
    push_err(&mut out, "email", policy.email.validate(&a.email));
    push_err(&mut out, "group", validate_required("Group", &a.group));
    push_err(&mut out, "timeZone", validate_required("Time zone", &a.time_zone));
    out
}

pub fn validate_notification(n: &NotificationSettings) -> Vec<StepMessage> {
    let mut out = Vec::new();
    if n.smtp_port == 0 {
        out.push(StepMessage::error(Some("smtpPort"), "SMTP port is required"));
    }
    if language_by_id(n.default_lang_id).is_none() {
        out.push(StepMessage::error(
            Some("defaultLangId"),
            format!("Unknown language id {}", n.default_lang_id),
        ));
    }
    if !EXPORT_FONTS.contains(&n.default_export_font.as_str()) {
        out.push(StepMessage::error(
            Some("defaultExportFont"),
            format!(
                "Export font must be one of {}",
                EXPORT_FONTS.join(", ")
            ),
        ));
    }
    out
}

/// Range checks only; tool presence is the tools gate's job.
pub fn validate_tool_fields(t: &ToolSettings) -> Vec<StepMessage> {
    let mut out = Vec::new();
    push_err(&mut out, "docDpi", validate_range("Document DPI", t.doc_dpi, 50, 600));
    push_err(
        &mut out,
        "docQuality",
        validate_range("Document quality", t.doc_quality, 1, 100),
    );
    out
}

pub fn validate_telephony(t: &TelephonySettings) -> Vec<StepMessage> {
    let mut out = Vec::new();
    push_err(
        &mut out,
        "cryptProvider",
        validate_required("Crypt provider", &t.crypt_provider),
    );
    out
}
