// Cosmos device app functional test harness
//
// Copyright (C) 2024 Alekos Filini
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use core::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::snapshot::Snapshot;

pub const APP_SEED: &str = "equip will roof matter pink blind book anxiety banner elbow sun young";

pub const DEFAULT_EMULATOR: &str = "device-emulator";
pub const DEFAULT_APP_DIR: &str = "../app/build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Nanos,
    Nanox,
    Nanosp,
    Stax,
    Flex,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Nanos,
        ModelKind::Nanox,
        ModelKind::Nanosp,
        ModelKind::Stax,
        ModelKind::Flex,
    ];
}

/// One input performed on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InputStep {
    Left,
    Right,
    Both,
    Tap(u16, u16),
}

impl fmt::Display for InputStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputStep::Tap(x, y) => write!(f, "Tap({}, {})", x, y),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// Where the controls of the review screens sit on touch models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchLayout {
    pub next: (u16, u16),
    pub approve: (u16, u16),
    pub reject: (u16, u16),
    /// "Yes, reject" on the confirmation page shown after `reject`
    pub reject_confirm: (u16, u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMethod {
    Buttons,
    Touch(TouchLayout),
}

/// Text the navigation looks for before issuing the terminal action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keywords {
    pub show_address: &'static str,
    pub show_path: &'static str,
    pub sign: &'static str,
    pub reject: &'static str,
}

/// Inputs that reach the expert mode switch from the main menu and come back.
///
/// `toggle` is only pressed when the switch isn't already in the requested
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpertModeMenu {
    pub open: &'static [InputStep],
    pub toggle: InputStep,
    pub close: &'static [InputStep],
    /// Text shown on the switch screen when expert mode is on
    pub enabled_marker: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareVariant {
    pub kind: ModelKind,
    pub name: &'static str,
    pub prefix: &'static str,
    pub elf: PathBuf,
    pub input: InputMethod,
    pub keywords: Keywords,
    pub expert_mode: ExpertModeMenu,
    /// Index of the first signing screen when the review follows an address
    /// confirmation in the same snapshot series
    pub sign_after_show_start: usize,
}

impl HardwareVariant {
    pub fn is_touch(&self) -> bool {
        matches!(self.input, InputMethod::Touch(_))
    }

    /// Directory name used for this model's snapshot series, e.g. `sp-sign_basic`
    pub fn snapshot_dir_name(&self, label: &str) -> String {
        format!("{}-{}", self.prefix.to_lowercase(), label)
    }
}

impl fmt::Display for HardwareVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

const NANO_KEYWORDS: Keywords = Keywords {
    show_address: "APPROVE",
    show_path: "APPROVE",
    sign: "APPROVE",
    reject: "REJECT",
};

const NANO_EXPERT_MENU: ExpertModeMenu = ExpertModeMenu {
    open: &[InputStep::Right],
    toggle: InputStep::Both,
    close: &[InputStep::Left],
    enabled_marker: "enabled",
};

const STAX_LAYOUT: TouchLayout = TouchLayout {
    next: (350, 615),
    approve: (200, 515),
    reject: (36, 615),
    reject_confirm: (200, 515),
};

const FLEX_LAYOUT: TouchLayout = TouchLayout {
    next: (405, 550),
    approve: (240, 435),
    reject: (55, 550),
    reject_confirm: (240, 440),
};

fn build_registry(app_dir: &Path) -> Vec<HardwareVariant> {
    let elf = |build: &str| app_dir.join(build).join("bin").join("app.elf");

    vec![
        HardwareVariant {
            kind: ModelKind::Nanos,
            name: "nanos",
            prefix: "S",
            elf: elf("nanos"),
            input: InputMethod::Buttons,
            keywords: NANO_KEYWORDS,
            expert_mode: NANO_EXPERT_MENU,
            sign_after_show_start: 5,
        },
        HardwareVariant {
            kind: ModelKind::Nanox,
            name: "nanox",
            prefix: "X",
            elf: elf("nanox"),
            input: InputMethod::Buttons,
            keywords: NANO_KEYWORDS,
            expert_mode: NANO_EXPERT_MENU,
            sign_after_show_start: 4,
        },
        HardwareVariant {
            kind: ModelKind::Nanosp,
            name: "nanosp",
            prefix: "SP",
            elf: elf("nanos2"),
            input: InputMethod::Buttons,
            keywords: NANO_KEYWORDS,
            expert_mode: NANO_EXPERT_MENU,
            sign_after_show_start: 4,
        },
        HardwareVariant {
            kind: ModelKind::Stax,
            name: "stax",
            prefix: "ST",
            elf: elf("stax"),
            input: InputMethod::Touch(STAX_LAYOUT),
            keywords: Keywords {
                show_address: "Cancel",
                show_path: "Path",
                sign: "approve",
                reject: "Reject",
            },
            expert_mode: ExpertModeMenu {
                open: &[InputStep::Tap(342, 55)],
                toggle: InputStep::Tap(350, 115),
                close: &[InputStep::Tap(36, 55)],
                enabled_marker: "enabled",
            },
            sign_after_show_start: 3,
        },
        HardwareVariant {
            kind: ModelKind::Flex,
            name: "flex",
            prefix: "FL",
            elf: elf("flex"),
            input: InputMethod::Touch(FLEX_LAYOUT),
            keywords: Keywords {
                show_address: "APPROVE",
                show_path: "APPROVE",
                sign: "APPROVE",
                reject: "Reject",
            },
            expert_mode: ExpertModeMenu {
                open: &[InputStep::Tap(405, 75)],
                toggle: InputStep::Tap(415, 130),
                close: &[InputStep::Tap(55, 75)],
                enabled_marker: "enabled",
            },
            sign_after_show_start: 4,
        },
    ]
}

static MODELS: OnceLock<Vec<HardwareVariant>> = OnceLock::new();

/// Initialize the registry with the app build directory. Only the first call
/// has any effect, later ones return the existing registry.
pub fn init_models(app_dir: &Path) -> &'static [HardwareVariant] {
    MODELS.get_or_init(|| build_registry(app_dir))
}

/// The registry, with the app build directory taken from `ZEMU_APP_DIR`
pub fn models() -> &'static [HardwareVariant] {
    MODELS.get_or_init(|| {
        let app_dir = std::env::var("ZEMU_APP_DIR").unwrap_or_else(|_| DEFAULT_APP_DIR.into());
        build_registry(Path::new(&app_dir))
    })
}

pub fn get_model(kind: ModelKind) -> &'static HardwareVariant {
    models()
        .iter()
        .find(|m| m.kind == kind)
        .expect("Every model kind is in the registry")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
pub enum ApproveAction {
    /// Single press on the approve control
    Tap,
    /// Press, wait for the device to register it, then release
    Hold,
    /// Only step through the screens
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApprovalConfig {
    pub action: ApproveAction,
    pub keyword: String,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        ApprovalConfig {
            action: ApproveAction::Tap,
            keyword: "APPROVE".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub emulator: PathBuf,
    pub seed: String,
    pub headless: bool,
    pub approval: ApprovalConfig,
    /// Extra wait after the first frame, before the main menu is captured
    pub start_delay: Duration,
    pub startup_timeout: Duration,
    pub join_logs: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            emulator: DEFAULT_EMULATOR.into(),
            seed: APP_SEED.into(),
            headless: true,
            approval: ApprovalConfig::default(),
            start_delay: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(20),
            join_logs: false,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let mut config = SessionConfig::default();
        if let Ok(emulator) = std::env::var("ZEMU_EMULATOR") {
            config.emulator = emulator.into();
        }
        config
    }

    pub fn with_approval(mut self, approval: ApprovalConfig) -> Self {
        self.approval = approval;
        self
    }
}

#[derive(Debug, Clone)]
pub struct NavigationConfig {
    /// How long a screen transition may take
    pub transition_timeout: Duration,
    /// How long the device may take to register a hold
    pub hold_timeout: Duration,
    /// First polling delay, doubled on every poll up to `max_poll_interval`
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
    /// Extra captures of a mismatching screen before giving up on it
    pub mismatch_retries: usize,
    /// Screens reviewed before the keyword must have shown up
    pub max_steps: usize,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        NavigationConfig {
            transition_timeout: Duration::from_secs(20),
            hold_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(25),
            max_poll_interval: Duration::from_millis(200),
            mismatch_retries: 4,
            max_steps: 64,
        }
    }
}

#[derive(Debug)]
pub struct TestLogStep {
    pub action: String,
    pub index: Option<usize>,
    pub display: Snapshot,
    pub expected: Option<Snapshot>,
    pub pass: bool,
    pub fail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TestLog {
    pub result: bool, // used in the Handlebars template
    pub model: String,
    pub scenario: String,
    pub steps: Vec<TestLogStep>,
    pub log_lines: Vec<String>,
}

impl TestLog {
    pub fn new(model: &HardwareVariant, scenario: &str) -> Self {
        TestLog {
            result: false,
            model: model.name.to_string(),
            scenario: scenario.to_string(),
            steps: vec![],
            log_lines: vec![],
        }
    }

    pub fn push(&mut self, action: impl ToString, index: Option<usize>, display: &Snapshot) {
        self.steps.push(TestLogStep {
            action: action.to_string(),
            index,
            display: display.clone(),
            expected: None,
            pass: true,
            fail: None,
        });
    }

    pub fn fail(&mut self, expected: Option<Snapshot>, reason: impl ToString) {
        if let Some(step) = self.steps.last_mut() {
            step.pass = false;
            step.expected = expected;
            step.fail = Some(reason.to_string());
        }
    }
}

impl Serialize for TestLogStep {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::{Error, SerializeMap};

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("action", &self.action)?;
        map.serialize_entry("index", &self.index)?;
        map.serialize_entry(
            "display",
            &self.display.to_base64_png().map_err(S::Error::custom)?,
        )?;
        if let Some(expected) = &self.expected {
            map.serialize_entry(
                "expected",
                &expected.to_base64_png().map_err(S::Error::custom)?,
            )?;
        }
        map.serialize_entry("texts", &self.display.texts)?;
        map.serialize_entry("pass", &self.pass)?;
        map.serialize_entry("fail", &self.fail)?;
        map.end()
    }
}
