// Collected installation settings, grouped by the step that edits them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::database::descriptor::ConnectionDescriptor;
use crate::models::options::{encode_bool, BoolEncoding};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigModel {
    pub app_name: String,
    pub database: ConnectionDescriptor,
    pub account: AdminAccount,
    pub notification: NotificationSettings,
    pub tools: ToolSettings,
    pub telephony: TelephonySettings,
}

impl Default for ConfigModel {
    fn default() -> Self {
        Self {
            app_name: "Conference Server".to_string(),
            database: ConnectionDescriptor::default(),
            account: AdminAccount::default(),
            notification: NotificationSettings::default(),
            tools: ToolSettings::default(),
            telephony: TelephonySettings::default(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminAccount {
    pub username: String,
    pub password: String,
    pub email: String,
    pub group: String,
    /// Calendar time zone of the administrator, IANA name.
    pub time_zone: String,
}

impl Default for AdminAccount {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            email: String::new(),
            group: String::new(),
            time_zone: "UTC".to_string(),
        }
    }
}

impl fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminAccount")
            .field("username", &self.username)
            .field("password", &"***")
            .field("email", &self.email)
            .field("group", &self.group)
            .field("time_zone", &self.time_zone)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub allow_frontend_register: bool,
    pub send_email_at_register: bool,
    pub send_email_with_verification_code: bool,
    pub create_default_rooms: bool,
    pub mail_referer: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub mail_auth_name: String,
    pub mail_auth_pass: String,
    pub mail_use_tls: bool,
    pub reply_to_organizer: bool,
    pub default_lang_id: u32,
    pub default_export_font: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            allow_frontend_register: true,
            send_email_at_register: false,
            send_email_with_verification_code: false,
            create_default_rooms: true,
            mail_referer: "noreply@localhost".to_string(),
            smtp_server: "localhost".to_string(),
            smtp_port: 25,
            mail_auth_name: String::new(),
            mail_auth_pass: String::new(),
            mail_use_tls: false,
            reply_to_organizer: true,
            default_lang_id: 1,
            default_export_font: "TimesNewRoman".to_string(),
        }
    }
}

impl fmt::Debug for NotificationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSettings")
            .field("allow_frontend_register", &self.allow_frontend_register)
            .field("send_email_at_register", &self.send_email_at_register)
            .field(
                "send_email_with_verification_code",
                &self.send_email_with_verification_code,
            )
            .field("create_default_rooms", &self.create_default_rooms)
            .field("mail_referer", &self.mail_referer)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("mail_auth_name", &self.mail_auth_name)
            .field("mail_auth_pass", &"***")
            .field("mail_use_tls", &self.mail_use_tls)
            .field("reply_to_organizer", &self.reply_to_organizer)
            .field("default_lang_id", &self.default_lang_id)
            .field("default_export_font", &self.default_export_font)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    pub doc_dpi: u32,
    pub doc_quality: u32,
    pub image_magick_path: String,
    pub ffmpeg_path: String,
    pub sox_path: String,
    pub office_path: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            doc_dpi: 150,
            doc_quality: 90,
            image_magick_path: String::new(),
            ffmpeg_path: String::new(),
            sox_path: String::new(),
            office_path: String::new(),
        }
    }
}

impl ToolSettings {
    /// The four path fields in a fixed order.
    pub fn paths(&self) -> [&str; 4] {
        [
            &self.image_magick_path,
            &self.ffmpeg_path,
            &self.sox_path,
            &self.office_path,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelephonySettings {
    pub crypt_provider: String,
    pub sip_enabled: bool,
    pub sip_room_prefix: String,
    pub sip_exten_context: String,
}

impl Default for TelephonySettings {
    fn default() -> Self {
        Self {
            crypt_provider: "scrypt".to_string(),
            sip_enabled: false,
            sip_room_prefix: "400".to_string(),
            sip_exten_context: "rooms".to_string(),
        }
    }
}

impl ConfigModel {
    /// Flatten into the key/value properties handed to the installer.
    ///
    /// Yes/no choices use the numeric encoding except the SIP switch, which
    /// the telephony bridge reads as text.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        let mut put = |k: &str, v: String| {
            p.insert(k.to_string(), v);
        };
        let num = |b: bool| encode_bool(b, BoolEncoding::Numeric);

        put("application.name", self.app_name.clone());

        put("db.type", self.database.dialect.as_str().to_string());
        put("db.url", self.database.connection_url());
        put("db.login", self.database.login.clone());
        put("db.password", self.database.password.clone());

        put("admin.username", self.account.username.clone());
        put("admin.password", self.account.password.clone());
        put("admin.email", self.account.email.clone());
        put("admin.group", self.account.group.clone());
        put("calendar.timezone", self.account.time_zone.clone());

        let n = &self.notification;
        put("frontend.register.allow", num(n.allow_frontend_register));
        put("mail.send.at.register", num(n.send_email_at_register));
        put(
            "mail.send.verification.code",
            num(n.send_email_with_verification_code),
        );
        put("rooms.create.default", num(n.create_default_rooms));
        put("mail.referer", n.mail_referer.clone());
        put("smtp.server", n.smtp_server.clone());
        put("smtp.port", n.smtp_port.to_string());
        put("mail.auth.name", n.mail_auth_name.clone());
        put("mail.auth.pass", n.mail_auth_pass.clone());
        put("mail.tls", num(n.mail_use_tls));
        put("mail.reply.to.organizer", num(n.reply_to_organizer));
        put("default.lang.id", n.default_lang_id.to_string());
        put("default.export.font", n.default_export_font.clone());

        let t = &self.tools;
        put("document.dpi", t.doc_dpi.to_string());
        put("document.quality", t.doc_quality.to_string());
        put("path.imagemagick", t.image_magick_path.clone());
        put("path.ffmpeg", t.ffmpeg_path.clone());
        put("path.sox", t.sox_path.clone());
        put("path.office", t.office_path.clone());

        let s = &self.telephony;
        put("crypt.provider", s.crypt_provider.clone());
        put("sip.enable", encode_bool(s.sip_enabled, BoolEncoding::Text));
        put("sip.room.prefix", s.sip_room_prefix.clone());
        put("sip.exten.context", s.sip_exten_context.clone());

        p
    }
}
