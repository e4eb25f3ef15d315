//! # EOL Console Core Library
//!
//! Hardware session coordinator for the End-of-Line tester operator console.

#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A typed client for the tester's REST API and realtime topic bus
//! - A single authoritative mirror of robot, power supply, load cell, MCU
//!   and digital I/O state
//! - Safety-gated command execution with operator confirmations
//! - Adaptive status polling
//! - Per-panel operation logs, telemetry buffers and exports
//!
//! The host (a browser shell, a desktop window, a test harness) supplies the
//! HTTP client, the realtime bus, dialogs and the view through the traits in
//! [`transport`] and [`host`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use eol_console_core::prelude::*;
//!
//! let session = HardwareSession::new(SessionConfig::default(), http, bus, modal, view)?;
//! session.activate_panel(PanelId::Robot).await;
//! session.set_active_view(Some(PanelId::Robot));
//!
//! let home = session.panels().robot.home();
//! session.execute(home).await?;
//! ```

pub mod command;
pub mod config;
pub mod demo;
pub mod host;
pub mod mirror;
pub mod oplog;
pub mod panels;
pub mod poller;
pub mod preferences;
pub mod safety;
pub mod session;
pub mod telemetry;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::command::{Command, CommandError, CommandRecord, CommandStatus, Verb};
    pub use crate::config::SessionConfig;
    pub use crate::demo::DemoHardware;
    pub use crate::host::{
        ConfirmationRequest, ConfirmationResponse, ModalHost, Notification, ViewBinder,
    };
    pub use crate::mirror::{ComponentKind, ComponentState, StateMirror};
    pub use crate::oplog::{ExportFormat, LogEntry, LogLevel};
    pub use crate::panels::configuration::ConfigRequest;
    pub use crate::panels::PanelId;
    pub use crate::preferences::{FilePreferenceStore, OperatorPreferences, PreferenceStore};
    pub use crate::safety::SafetyThresholds;
    pub use crate::session::HardwareSession;
    pub use crate::telemetry::{Signal, TelemetryPoint};
    pub use crate::transport::{
        BusConnectionState, BusEvent, BusMessage, HttpClient, RealtimeBus, ReqwestHttpClient,
        Topic,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
