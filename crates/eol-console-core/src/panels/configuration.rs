//! Configuration panel
//!
//! Profile browsing and maintenance against `/config/*`. None of these
//! requests touch hardware, so they bypass the safety gate and the busy
//! tracker; [`ConfigurationPanel::fetch`] performs the call and
//! [`ConfigurationPanel::on_config_result`] absorbs the answer.

use serde_json::{json, Value};

use super::{element, PanelContext, PanelCoordinator, PanelId};
use crate::command::CommandError;
use crate::host::{ListenerRegistry, StatusClass};
use crate::mirror::{ComponentKind, MirrorEvent};
use crate::oplog::LogLevel;
use crate::poller::PollTarget;
use crate::transport::{ApiClient, ApiRequest, HttpClient, Topic};

const PANEL: PanelId = PanelId::Configuration;

const GESTURES: &[(&str, &str)] = &[
    ("profile-select", "change"),
    ("save-btn", "click"),
    ("validate-btn", "click"),
    ("backup-btn", "click"),
    ("import-btn", "click"),
    ("export-btn", "click"),
];

/// Requests the configuration panel can make
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigRequest {
    Current,
    ListProfiles,
    LoadProfile { name: String },
    SaveProfile { name: String, configuration: Value },
    Validate { config_type: String, configuration: Value },
    Backup,
    Import { document: Value },
    ExportAll,
}

impl ConfigRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigRequest::Current => "current",
            ConfigRequest::ListProfiles => "listProfiles",
            ConfigRequest::LoadProfile { .. } => "loadProfile",
            ConfigRequest::SaveProfile { .. } => "saveProfile",
            ConfigRequest::Validate { .. } => "validate",
            ConfigRequest::Backup => "backup",
            ConfigRequest::Import { .. } => "import",
            ConfigRequest::ExportAll => "exportAll",
        }
    }

    /// Build the API request; profile names are checked first
    pub fn request(&self) -> Result<ApiRequest, CommandError> {
        let request = match self {
            ConfigRequest::Current => ApiRequest::get("/config/current"),
            ConfigRequest::ListProfiles => ApiRequest::get("/config/profiles"),
            ConfigRequest::LoadProfile { name } => {
                ApiRequest::get(format!("/config/profiles/{}", check_profile_name(name)?))
            }
            ConfigRequest::SaveProfile {
                name,
                configuration,
            } => ApiRequest::put(
                format!("/config/profiles/{}", check_profile_name(name)?),
                json!({"profile_name": name, "configuration": configuration}),
            ),
            ConfigRequest::Validate {
                config_type,
                configuration,
            } => ApiRequest::post(
                "/config/validate",
                json!({"config_type": config_type, "configuration": configuration}),
            ),
            ConfigRequest::Backup => ApiRequest::post("/config/backup", json!({})),
            ConfigRequest::Import { document } => {
                ApiRequest::post("/config/import", document.clone())
            }
            ConfigRequest::ExportAll => ApiRequest::post("/config/export-all", json!({})),
        };
        Ok(request)
    }
}

/// Letters, digits, `-` and `_` only
fn check_profile_name(name: &str) -> Result<&str, CommandError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Validation {
            reason: "Profile name is required".into(),
        });
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CommandError::Validation {
            reason: format!("Invalid profile name: {trimmed}"),
        });
    }
    Ok(trimmed)
}

/// Outcome of `POST /config/validate`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn from_value(value: &Value) -> Self {
        let strings = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        let errors = strings("validation_errors");
        Self {
            is_valid: value
                .get("is_valid")
                .and_then(Value::as_bool)
                .unwrap_or(errors.is_empty()),
            errors,
            warnings: strings("validation_warnings"),
        }
    }
}

#[derive(Default)]
pub struct ConfigurationPanel {
    listeners: ListenerRegistry,
    active_profile: Option<String>,
    profiles: Vec<String>,
    current: Option<Value>,
    loaded: Option<Value>,
    validation: Option<ValidationReport>,
    last_export: Option<Value>,
}

impl ConfigurationPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.active_profile.as_deref()
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    /// Motion parameters of the active profile
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    /// Last profile loaded for editing
    pub fn loaded_profile(&self) -> Option<&Value> {
        self.loaded.as_ref()
    }

    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }

    /// Document returned by the last export-all
    pub fn last_export(&self) -> Option<&Value> {
        self.last_export.as_ref()
    }

    /// Perform `request` against the API
    pub async fn fetch<H: HttpClient>(
        api: &ApiClient<H>,
        request: &ConfigRequest,
    ) -> Result<Option<Value>, CommandError> {
        let api_request = request.request()?;
        let envelope = api.call(&api_request).await?;
        envelope
            .into_result()
            .map_err(|reason| CommandError::Remote { reason })
    }

    /// Absorb the answer to `request`: update state, render and log
    pub fn on_config_result(
        &mut self,
        ctx: &mut PanelContext<'_>,
        request: &ConfigRequest,
        result: Result<Option<&Value>, &CommandError>,
    ) {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                ctx.log(e.log_level(), format!("Configuration {} failed: {}", request.name(), e));
                return;
            }
        };
        match request {
            ConfigRequest::Current => {
                if let Some(name) = value
                    .and_then(|v| v.get("profile_name"))
                    .and_then(Value::as_str)
                {
                    self.active_profile = Some(name.to_string());
                }
                self.current = value.cloned();
                self.render_profile(ctx);
            }
            ConfigRequest::ListProfiles => {
                self.profiles = value
                    .and_then(|v| v.get("profiles"))
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(current) = value
                    .and_then(|v| v.get("current_profile"))
                    .and_then(Value::as_str)
                {
                    self.active_profile = Some(current.to_string());
                }
                ctx.view.set_text(
                    &element(PANEL, "profile-count"),
                    &self.profiles.len().to_string(),
                );
                self.render_profile(ctx);
            }
            ConfigRequest::LoadProfile { name } => {
                self.loaded = value.cloned();
                ctx.log(LogLevel::Info, format!("Loaded profile {name}"));
            }
            ConfigRequest::SaveProfile { name, .. } => {
                ctx.log(LogLevel::Success, format!("Saved profile {name}"));
            }
            ConfigRequest::Validate { .. } => {
                let report = value.map(ValidationReport::from_value).unwrap_or_default();
                if report.is_valid {
                    ctx.log(LogLevel::Success, "Configuration is valid");
                } else {
                    ctx.log(
                        LogLevel::Warning,
                        format!("Configuration invalid: {}", report.errors.join("; ")),
                    );
                }
                for warning in &report.warnings {
                    ctx.log(LogLevel::Warning, warning.clone());
                }
                self.validation = Some(report);
                self.render_validation(ctx);
            }
            ConfigRequest::Backup => ctx.log(LogLevel::Success, "Configuration backup created"),
            ConfigRequest::Import { .. } => ctx.log(LogLevel::Success, "Configuration imported"),
            ConfigRequest::ExportAll => {
                self.last_export = value.cloned();
                ctx.log(LogLevel::Success, "Configuration exported");
            }
        }
    }

    fn render_profile(&self, ctx: &PanelContext<'_>) {
        ctx.view.set_text(
            &element(PANEL, "active-profile"),
            self.active_profile.as_deref().unwrap_or("--"),
        );
    }

    fn render_validation(&self, ctx: &PanelContext<'_>) {
        let Some(report) = &self.validation else {
            return;
        };
        let (text, class) = if report.is_valid {
            ("Valid", StatusClass::Connected)
        } else {
            ("Invalid", StatusClass::Error)
        };
        ctx.view.set_text(&element(PANEL, "validation"), text);
        ctx.view.set_status(&element(PANEL, "validation"), class);
    }
}

impl PanelCoordinator for ConfigurationPanel {
    fn id(&self) -> PanelId {
        PANEL
    }

    fn components(&self) -> &'static [ComponentKind] {
        &[]
    }

    fn topics(&self) -> Vec<Topic> {
        Vec::new()
    }

    fn poll_targets(&self) -> Vec<PollTarget> {
        Vec::new()
    }

    fn gestures(&self) -> &'static [(&'static str, &'static str)] {
        GESTURES
    }

    fn listeners(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    fn render(&mut self, ctx: &mut PanelContext<'_>) {
        self.render_profile(ctx);
        self.render_validation(ctx);
    }

    fn on_mirror(&mut self, _ctx: &mut PanelContext<'_>, _event: &MirrorEvent) {}
}
