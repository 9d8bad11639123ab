//! Native overlay handoff
//!
//! The web client hands a timer to the always-on-top overlay process through
//! a custom URL scheme. Whether the app is installed cannot be asked directly:
//! the client navigates a hidden frame to the URL and treats a window blur
//! within a short window as "an app opened". No blur means "probably not
//! installed" and the installer prompt is shown. Both outcomes can be wrong.
//!
//! [`hand_off`] and [`forward_feedback`] are for hosts that can supply an
//! [`InstallProbe`] (a browser shell or desktop embedder). The terminal client
//! only builds the URL and the installer fallback.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    client::{CommandSink, FocusSession, TimerView},
    error::{ClientError, SurfaceError},
};

/// Scheme registered by the overlay installer
pub const OVERLAY_SCHEME: &str = "focustimer";

/// How long to wait for the blur signal
pub const INSTALL_DETECTION_TIMEOUT: Duration = Duration::from_millis(1500);

/// Payload carried by the handoff URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayLaunch {
    pub task: String,
    pub subtask: String,
    pub duration_secs: u64,
    pub autostart: bool,
}

impl OverlayLaunch {
    /// Build `scheme://start?task=..&subtask=..&duration=..&autostart=..`
    pub fn to_url(&self, scheme: &str) -> Result<Url, SurfaceError> {
        let mut url = Url::parse(&format!("{}://start", scheme))
            .map_err(|e| SurfaceError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("task", &self.task)
            .append_pair("subtask", &self.subtask)
            .append_pair("duration", &self.duration_secs.to_string())
            .append_pair("autostart", if self.autostart { "true" } else { "false" });
        Ok(url)
    }

    /// Parse a handoff URL on the overlay side.
    ///
    /// Missing titles default to empty and a missing `autostart` to false; a
    /// missing or malformed duration is an error.
    pub fn parse(url: &Url) -> Result<Self, SurfaceError> {
        if url.host_str() != Some("start") {
            return Err(SurfaceError::InvalidUrl(format!("unknown action in {}", url)));
        }

        let mut launch = Self {
            task: String::new(),
            subtask: String::new(),
            duration_secs: 0,
            autostart: false,
        };
        let mut duration = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "task" => launch.task = value.into_owned(),
                "subtask" => launch.subtask = value.into_owned(),
                "duration" => duration = value.parse::<u64>().ok(),
                "autostart" => launch.autostart = value == "true" || value == "1",
                _ => {}
            }
        }
        launch.duration_secs = duration
            .filter(|secs| *secs > 0)
            .ok_or_else(|| SurfaceError::InvalidUrl(format!("missing or invalid duration in {}", url)))?;
        Ok(launch)
    }
}

/// Platform-specific capability used to guess whether the overlay is installed
pub trait InstallProbe: Send + Sync {
    /// Resolves when the host window loses focus
    fn watch_blur(&self) -> oneshot::Receiver<()>;

    /// Point a hidden frame at `url`
    fn navigate_hidden(&self, url: &Url) -> Result<(), SurfaceError>;
}

/// Result of the install heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallDetection {
    /// Window blurred in time; assume the overlay opened
    Launched,
    NotDetected,
}

/// Try the handoff and wait up to `timeout` for the blur signal
pub async fn detect_installed(probe: &dyn InstallProbe, url: &Url, timeout: Duration) -> InstallDetection {
    let blur = probe.watch_blur();
    if let Err(e) = probe.navigate_hidden(url) {
        debug!("Overlay handoff navigation failed: {}", e);
        return InstallDetection::NotDetected;
    }
    match tokio::time::timeout(timeout, blur).await {
        Ok(Ok(())) => InstallDetection::Launched,
        _ => InstallDetection::NotDetected,
    }
}

/// Operating systems the overlay ships for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
    Other,
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }

    /// Best guess from a browser user agent
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_lowercase();
        if ua.contains("iphone") || ua.contains("ipad") || ua.contains("android") {
            Platform::Other
        } else if ua.contains("mac os") || ua.contains("macintosh") {
            Platform::MacOs
        } else if ua.contains("windows") {
            Platform::Windows
        } else if ua.contains("linux") || ua.contains("x11") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }

    /// Installer file offered for download, if any
    pub fn installer(&self) -> Option<&'static str> {
        match self {
            Platform::MacOs => Some("FocusOverlay.dmg"),
            Platform::Windows => Some("FocusOverlay-Setup.exe"),
            Platform::Linux => Some("FocusOverlay.AppImage"),
            Platform::Other => None,
        }
    }
}

/// Fallback shown when the overlay did not appear
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerPrompt {
    pub platform: Platform,
    /// `None` means the overlay is unsupported here
    pub installer: Option<String>,
}

impl InstallerPrompt {
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            platform,
            installer: platform.installer().map(str::to_string),
        }
    }
}

/// Outcome of handing a timer to the overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    Launched,
    ShowInstaller(InstallerPrompt),
}

/// Hand `launch` to the overlay, falling back to the installer prompt
pub async fn hand_off(
    probe: &dyn InstallProbe,
    launch: &OverlayLaunch,
    platform: Platform,
) -> Result<HandoffOutcome, SurfaceError> {
    let url = launch.to_url(OVERLAY_SCHEME)?;
    match detect_installed(probe, &url, INSTALL_DETECTION_TIMEOUT).await {
        InstallDetection::Launched => {
            info!("Overlay opened for {}", launch.subtask);
            Ok(HandoffOutcome::Launched)
        }
        InstallDetection::NotDetected => {
            info!("Overlay did not respond, offering installer for {:?}", platform);
            Ok(HandoffOutcome::ShowInstaller(InstallerPrompt::for_platform(platform)))
        }
    }
}

/// Local control surface exposed by the overlay process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayControl {
    Show,
    Hide,
    Toggle,
    Quit,
}

/// Messages the overlay pushes back to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayFeedback {
    /// The user hit the overlay's own play/pause button
    #[serde(rename_all = "camelCase")]
    RunningToggled { is_running: bool },
}

/// Overlay-side window state; renders the view only while visible
#[derive(Debug)]
pub struct OverlayWindow {
    visible: bool,
    is_running: bool,
    last_text: String,
    feedback: mpsc::UnboundedSender<OverlayFeedback>,
}

impl OverlayWindow {
    /// New hidden window plus the receiving end of its feedback channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OverlayFeedback>) {
        let (feedback, feedback_rx) = mpsc::unbounded_channel();
        let window = Self {
            visible: false,
            is_running: false,
            last_text: String::new(),
            feedback,
        };
        (window, feedback_rx)
    }

    /// Apply a launch URL: show the window and adopt the autostart flag
    pub fn launch(&mut self, launch: &OverlayLaunch) {
        self.visible = true;
        self.is_running = launch.autostart;
    }

    /// Apply a control command. Returns false once the overlay should exit.
    pub fn control(&mut self, command: OverlayControl) -> bool {
        match command {
            OverlayControl::Show => self.visible = true,
            OverlayControl::Hide => self.visible = false,
            OverlayControl::Toggle => self.visible = !self.visible,
            OverlayControl::Quit => {
                self.visible = false;
                return false;
            }
        }
        true
    }

    /// User clicked play/pause on the overlay itself
    pub fn user_toggle(&mut self) {
        self.is_running = !self.is_running;
        let feedback = OverlayFeedback::RunningToggled { is_running: self.is_running };
        if self.feedback.send(feedback).is_err() {
            warn!("Overlay feedback channel closed; toggle stays local");
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn text(&self) -> &str {
        &self.last_text
    }
}

impl super::Surface for OverlayWindow {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn render(&mut self, view: &TimerView) -> Result<(), SurfaceError> {
        // The authoritative timer wins over the overlay's own toggle
        self.is_running = view.is_running;
        if self.visible {
            self.last_text = super::widget::widget_line(view);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.visible = false;
    }
}

/// Forward overlay toggles into the session as pause/resume commands
pub async fn forward_feedback(
    mut feedback: mpsc::UnboundedReceiver<OverlayFeedback>,
    session: &FocusSession,
    sink: &dyn CommandSink,
) {
    while let Some(OverlayFeedback::RunningToggled { is_running }) = feedback.recv().await {
        match session.overlay_toggled(sink, is_running) {
            Ok(()) => debug!("Overlay toggle applied (running={})", is_running),
            Err(ClientError::Disconnected) => warn!("Overlay toggle dropped while disconnected"),
            Err(e) => warn!("Overlay toggle failed: {}", e),
        }
    }
}
