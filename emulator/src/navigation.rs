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

//! Drives the on-device review: waits for the device to leave the idle
//! screen, steps through the review comparing every screen with its reference
//! and finally approves or rejects.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use model::emulator::{Button, InputMessage};

use crate::utils::model::{
    ApprovalConfig, ApproveAction, HardwareVariant, InputMethod, InputStep, NavigationConfig,
    TestLog,
};
use crate::utils::snapshot::{Comparison, Snapshot, SnapshotStore};

/// Screen and input side of a device
#[async_trait]
pub trait DeviceUi: Send {
    async fn capture(&mut self) -> Result<Snapshot, crate::Error>;
    async fn input(&mut self, input: InputMessage) -> Result<(), crate::Error>;
    /// Drop the text events reported so far for the current screen
    async fn delete_events(&mut self) -> Result<(), crate::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalFlow {
    pub outcome: Outcome,
    pub action: ApproveAction,
    pub keyword: String,
}

impl ApprovalFlow {
    pub fn approve(config: &ApprovalConfig) -> Self {
        ApprovalFlow {
            outcome: Outcome::Approve,
            action: config.action,
            keyword: config.keyword.clone(),
        }
    }

    pub fn reject(model: &HardwareVariant) -> Self {
        ApprovalFlow {
            outcome: Outcome::Reject,
            action: ApproveAction::Tap,
            keyword: model.keywords.reject.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NavigationError {
    #[error("{model}: screen {index} didn't show up within {timeout:?}")]
    TransitionTimeout {
        model: &'static str,
        index: usize,
        timeout: Duration,
    },
    #[error("{model}: snapshot {index} of `{label}` doesn't match the reference ({diff:?} pixels differ)")]
    SnapshotMismatch {
        model: &'static str,
        label: String,
        index: usize,
        diff: Option<usize>,
    },
    #[error("{model}: no reference for snapshot {index} of `{label}`: {path}")]
    MissingReference {
        model: &'static str,
        label: String,
        index: usize,
        path: String,
    },
    #[error("{model}: hold on screen {index} not registered within {timeout:?}")]
    HoldNotRegistered {
        model: &'static str,
        index: usize,
        timeout: Duration,
    },
    #[error("{model}: {keyword:?} not found after {index} screens")]
    KeywordNotFound {
        model: &'static str,
        keyword: String,
        index: usize,
    },
    #[error("{model}: device error on screen {index}: {source}")]
    Device {
        model: &'static str,
        index: usize,
        #[source]
        source: crate::Error,
    },
}

/// Polling delays: start at `poll_interval`, double up to `max_poll_interval`
struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    fn new(config: &NavigationConfig) -> Self {
        Backoff {
            next: config.poll_interval,
            max: config.max_poll_interval,
        }
    }

    fn step(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next * 2).min(self.max);
        current
    }
}

/// Raw input events for one navigation step
pub fn expand(step: InputStep) -> Vec<InputMessage> {
    match step {
        InputStep::Left => vec![
            InputMessage::Button(Button::Left, true),
            InputMessage::Button(Button::Left, false),
        ],
        InputStep::Right => vec![
            InputMessage::Button(Button::Right, true),
            InputMessage::Button(Button::Right, false),
        ],
        InputStep::Both => vec![
            InputMessage::Button(Button::Left, true),
            InputMessage::Button(Button::Right, true),
            InputMessage::Button(Button::Left, false),
            InputMessage::Button(Button::Right, false),
        ],
        InputStep::Tap(x, y) => vec![
            InputMessage::Finger { x, y, pressed: true },
            InputMessage::Finger {
                x,
                y,
                pressed: false,
            },
        ],
    }
}

pub struct Navigator<'a, U: DeviceUi + ?Sized> {
    ui: &'a mut U,
    model: &'static HardwareVariant,
    store: &'a SnapshotStore,
    config: &'a NavigationConfig,
    label: String,
    log: &'a mut TestLog,
}

impl<'a, U: DeviceUi + ?Sized> Navigator<'a, U> {
    pub fn new(
        ui: &'a mut U,
        model: &'static HardwareVariant,
        store: &'a SnapshotStore,
        config: &'a NavigationConfig,
        label: &str,
        log: &'a mut TestLog,
    ) -> Self {
        Navigator {
            ui,
            model,
            store,
            config,
            label: label.to_string(),
            log,
        }
    }

    fn next_step(&self) -> InputStep {
        match self.model.input {
            InputMethod::Buttons => InputStep::Right,
            InputMethod::Touch(layout) => InputStep::Tap(layout.next.0, layout.next.1),
        }
    }

    fn approve_step(&self) -> InputStep {
        match self.model.input {
            InputMethod::Buttons => InputStep::Both,
            InputMethod::Touch(layout) => InputStep::Tap(layout.approve.0, layout.approve.1),
        }
    }

    async fn capture(&mut self, index: usize) -> Result<Snapshot, NavigationError> {
        let model = self.model.name;
        self.ui
            .capture()
            .await
            .map_err(|source| NavigationError::Device {
                model,
                index,
                source,
            })
    }

    async fn send(&mut self, index: usize, input: InputMessage) -> Result<(), NavigationError> {
        log::trace!("> {}", input);

        let model = self.model.name;
        self.ui
            .input(input)
            .await
            .map_err(|source| NavigationError::Device {
                model,
                index,
                source,
            })
    }

    async fn press(&mut self, index: usize, step: InputStep) -> Result<(), NavigationError> {
        log::debug!("{}: {} on screen {}", self.model, step, index);

        for input in expand(step) {
            self.send(index, input).await?;
        }
        Ok(())
    }

    /// Poll until the screen differs from `from`, which becomes screen `index`
    async fn wait_for_change(
        &mut self,
        from: &Snapshot,
        index: usize,
    ) -> Result<Snapshot, NavigationError> {
        let timeout = self.config.transition_timeout;
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new(self.config);

        loop {
            let screen = self.capture(index).await?;
            if !screen.same_image(from) {
                return Ok(screen);
            }

            let now = Instant::now();
            if now >= deadline {
                self.log.push("Wait", Some(index), &screen);
                self.log.fail(None, "the screen didn't change");
                return Err(NavigationError::TransitionTimeout {
                    model: self.model.name,
                    index,
                    timeout,
                });
            }
            tokio::time::sleep(backoff.step().min(deadline - now)).await;
        }
    }

    /// Capture until two consecutive frames are identical
    async fn settle(&mut self, index: usize, mut screen: Snapshot) -> Result<Snapshot, NavigationError> {
        let deadline = Instant::now() + self.config.transition_timeout;
        let mut backoff = Backoff::new(self.config);

        loop {
            tokio::time::sleep(backoff.step()).await;
            let next = self.capture(index).await?;
            if next.same_image(&screen) || Instant::now() >= deadline {
                return Ok(next);
            }
            screen = next;
        }
    }

    /// Compare screen `index` with its reference. A mismatching screen is
    /// captured again a few times in case it was still being drawn.
    async fn check(
        &mut self,
        index: usize,
        action: &str,
        mut screen: Snapshot,
    ) -> Result<Snapshot, NavigationError> {
        if self.store.is_update() {
            screen = self.settle(index, screen).await?;
        }

        let mut backoff = Backoff::new(self.config);
        let mut retries = 0;
        loop {
            let comparison = self
                .store
                .check(self.model, &self.label, index, &screen)
                .map_err(|source| NavigationError::Device {
                    model: self.model.name,
                    index,
                    source,
                })?;

            match comparison {
                Comparison::Match | Comparison::Updated => {
                    self.log.push(action, Some(index), &screen);
                    return Ok(screen);
                }
                Comparison::Missing(path) => {
                    self.log.push(action, Some(index), &screen);
                    self.log.fail(None, "missing reference");
                    return Err(NavigationError::MissingReference {
                        model: self.model.name,
                        label: self.label.clone(),
                        index,
                        path: path.display().to_string(),
                    });
                }
                Comparison::Mismatch { .. } if retries < self.config.mismatch_retries => {
                    retries += 1;
                    tokio::time::sleep(backoff.step()).await;
                    screen = self.capture(index).await?;
                }
                Comparison::Mismatch { expected, diff } => {
                    self.log.push(action, Some(index), &screen);
                    self.log
                        .fail(Some(expected), format!("{:?} pixels differ", diff));
                    return Err(NavigationError::SnapshotMismatch {
                        model: self.model.name,
                        label: self.label.clone(),
                        index,
                        diff,
                    });
                }
            }
        }
    }

    /// Press `step` on screen `index` and check the screen that follows it
    async fn step(
        &mut self,
        index: &mut usize,
        step: InputStep,
        from: &Snapshot,
    ) -> Result<Snapshot, NavigationError> {
        self.press(*index, step).await?;
        let changed = self.wait_for_change(from, *index + 1).await?;
        *index += 1;
        self.check(*index, &step.to_string(), changed).await
    }

    /// Keep a finger on the approve control until the device visibly reacts,
    /// then lift it. The finger is lifted even when the hold failed.
    async fn hold(
        &mut self,
        index: usize,
        (x, y): (u16, u16),
        before: &Snapshot,
    ) -> Result<(), NavigationError> {
        log::debug!("{}: holding on screen {}", self.model, index);
        self.send(index, InputMessage::Finger { x, y, pressed: true })
            .await?;

        let registered = self.wait_for_hold(index, before).await;
        let released = self
            .send(
                index,
                InputMessage::Finger {
                    x,
                    y,
                    pressed: false,
                },
            )
            .await;
        if let (Err(_), Err(e)) = (&registered, &released) {
            log::warn!("{}: can't lift the finger after a failed hold: {}", self.model, e);
        }

        registered.and(released)
    }

    /// The hold counts once the screen moved away from `before` and stopped
    /// changing.
    async fn wait_for_hold(&mut self, index: usize, before: &Snapshot) -> Result<(), NavigationError> {
        let timeout = self.config.hold_timeout;
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new(self.config);
        let mut last: Option<Snapshot> = None;

        loop {
            let current = self.capture(index).await?;
            let changed = !current.same_image(before);
            if changed && last.as_ref().map_or(false, |prev| prev.same_image(&current)) {
                self.log.push("Hold", Some(index), &current);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                self.log.push("Hold", Some(index), &current);
                self.log.fail(None, "hold not registered");
                return Err(NavigationError::HoldNotRegistered {
                    model: self.model.name,
                    index,
                    timeout,
                });
            }

            last = if changed { Some(current) } else { None };
            tokio::time::sleep(backoff.step().min(deadline - now)).await;
        }
    }

    async fn reject(&mut self, index: &mut usize, screen: Snapshot) -> Result<Snapshot, NavigationError> {
        match self.model.input {
            InputMethod::Buttons => {
                self.press(*index, InputStep::Both).await?;
                Ok(screen)
            }
            InputMethod::Touch(layout) => {
                let (x, y) = layout.reject;
                let confirm = self.step(index, InputStep::Tap(x, y), &screen).await?;
                let (x, y) = layout.reject_confirm;
                self.press(*index, InputStep::Tap(x, y)).await?;
                Ok(confirm)
            }
        }
    }

    /// One review from the idle screen to the terminal action.
    ///
    /// Screens are numbered from `start_index`, the returned value is the next
    /// free index so that a following pass can continue the same series.
    pub async fn approval_pass(
        &mut self,
        idle: &Snapshot,
        start_index: usize,
        flow: &ApprovalFlow,
    ) -> Result<usize, NavigationError> {
        log::debug!(
            "{}: `{}` from {} until {:?} ({:?} {:?})",
            self.model,
            self.label,
            start_index,
            flow.keyword,
            flow.outcome,
            flow.action
        );

        let mut index = start_index;
        let first = self.wait_for_change(idle, index).await?;
        let mut screen = self.check(index, "Review", first).await?;

        while !screen.contains_text(&flow.keyword) {
            if index + 1 - start_index >= self.config.max_steps {
                self.log.fail(None, format!("{:?} never showed up", flow.keyword));
                return Err(NavigationError::KeywordNotFound {
                    model: self.model.name,
                    keyword: flow.keyword.clone(),
                    index,
                });
            }

            let next = self.next_step();
            screen = self.step(&mut index, next, &screen).await?;
        }

        let last = match (flow.outcome, flow.action) {
            (Outcome::Approve, ApproveAction::None) => return Ok(index + 1),
            (Outcome::Approve, ApproveAction::Tap) => {
                let approve = self.approve_step();
                self.press(index, approve).await?;
                screen
            }
            (Outcome::Approve, ApproveAction::Hold) => {
                match self.model.input {
                    // Button models act when the chord is released
                    InputMethod::Buttons => {
                        let approve = self.approve_step();
                        self.press(index, approve).await?;
                    }
                    InputMethod::Touch(layout) => self.hold(index, layout.approve, &screen).await?,
                }
                screen
            }
            (Outcome::Reject, _) => self.reject(&mut index, screen).await?,
        };

        let done = self.wait_for_change(&last, index + 1).await?;
        index += 1;
        self.check(index, "Done", done).await?;

        Ok(index + 1)
    }

    /// Walk the settings menu to put expert mode in the requested state and
    /// back to the main menu, starting from the main menu as screen
    /// `start_index`. Returns the next free index.
    pub async fn toggle_expert_mode(
        &mut self,
        enable: bool,
        start_index: usize,
    ) -> Result<usize, NavigationError> {
        let menu = self.model.expert_mode;
        let mut index = start_index;

        let current = self.capture(index).await?;
        let mut screen = self.check(index, "Main menu", current).await?;

        for step in menu.open {
            screen = self.step(&mut index, *step, &screen).await?;
        }
        if screen.contains_text(menu.enabled_marker) != enable {
            screen = self.step(&mut index, menu.toggle, &screen).await?;
        }
        for step in menu.close {
            screen = self.step(&mut index, *step, &screen).await?;
        }

        Ok(index + 1)
    }
}

/// Scripted in-process device for tests driving the navigation
#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use model::emulator::{Button, InputMessage};

    use super::DeviceUi;
    use crate::utils::model::NavigationConfig;
    use crate::utils::snapshot::Snapshot;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Gesture {
        Left,
        Right,
        Both,
        Tap(u16, u16),
        /// Hold registered after this many captures
        Hold(usize),
    }

    /// In-process device: a set of screens and the gestures moving between them
    pub struct ScriptedDevice {
        pub screens: Vec<Snapshot>,
        transitions: Vec<(usize, Gesture, usize)>,
        pub current: usize,
        buttons: Vec<Button>,
        chord: Vec<Button>,
        finger: Option<(u16, u16)>,
        held_for: usize,
        consumed: bool,
        pub inputs: Vec<InputMessage>,
        /// Inputs past this count fail as if the socket was closed
        pub accepted_inputs: Option<usize>,
        pub events_deleted: usize,
        /// Requests reaching the app, each moving the device to the first
        /// screen of its review
        pub requests: Option<mpsc::UnboundedReceiver<usize>>,
    }

    impl ScriptedDevice {
        pub fn new(screens: Vec<Snapshot>, transitions: Vec<(usize, Gesture, usize)>, current: usize) -> Self {
            ScriptedDevice {
                screens,
                transitions,
                current,
                buttons: vec![],
                chord: vec![],
                finger: None,
                held_for: 0,
                consumed: false,
                inputs: vec![],
                accepted_inputs: None,
                events_deleted: 0,
                requests: None,
            }
        }

        fn fire(&mut self, gesture: Gesture) {
            let current = self.current;
            if let Some((_, _, to)) = self
                .transitions
                .iter()
                .find(|(from, g, _)| *from == current && *g == gesture)
            {
                self.current = *to;
            }
        }

        fn holding(&self) -> bool {
            self.finger.is_some() || self.buttons.len() == 2
        }
    }

    #[async_trait]
    impl DeviceUi for ScriptedDevice {
        async fn capture(&mut self) -> Result<Snapshot, crate::Error> {
            if let Some(requests) = self.requests.as_mut() {
                while let Ok(to) = requests.try_recv() {
                    self.current = to;
                }
            }

            if self.holding() && !self.consumed {
                self.held_for += 1;
                let (current, held) = (self.current, self.held_for);
                let hit = self
                    .transitions
                    .iter()
                    .find(|(from, g, _)| {
                        *from == current && matches!(g, Gesture::Hold(n) if held >= *n)
                    })
                    .map(|t| t.2);
                if let Some(to) = hit {
                    self.current = to;
                    self.consumed = true;
                }
            }

            Ok(self.screens[self.current].clone())
        }

        async fn input(&mut self, input: InputMessage) -> Result<(), crate::Error> {
            if self.accepted_inputs.map_or(false, |n| self.inputs.len() >= n) {
                return Err("input socket closed".into());
            }
            self.inputs.push(input);

            match input {
                InputMessage::Button(b, true) => {
                    if !self.buttons.contains(&b) {
                        self.buttons.push(b);
                    }
                    if !self.chord.contains(&b) {
                        self.chord.push(b);
                    }
                }
                InputMessage::Button(b, false) => {
                    self.buttons.retain(|v| *v != b);
                    if self.buttons.is_empty() {
                        let gesture = if self.chord.len() == 2 {
                            Gesture::Both
                        } else if self.chord.contains(&Button::Left) {
                            Gesture::Left
                        } else {
                            Gesture::Right
                        };
                        self.chord.clear();
                        self.held_for = 0;
                        if !std::mem::take(&mut self.consumed) {
                            self.fire(gesture);
                        }
                    }
                }
                InputMessage::Finger {
                    x,
                    y,
                    pressed: true,
                } => {
                    self.finger = Some((x, y));
                    self.held_for = 0;
                }
                InputMessage::Finger {
                    x,
                    y,
                    pressed: false,
                } => {
                    self.finger = None;
                    self.held_for = 0;
                    if !std::mem::take(&mut self.consumed) {
                        self.fire(Gesture::Tap(x, y));
                    }
                }
            }

            Ok(())
        }

        async fn delete_events(&mut self) -> Result<(), crate::Error> {
            self.events_deleted += 1;
            Ok(())
        }
    }

    pub fn screen(fill: u8, texts: &[&str]) -> Snapshot {
        Snapshot::new(4, 2, vec![fill; 8]).with_texts(texts.iter().copied())
    }

    pub fn config() -> NavigationConfig {
        NavigationConfig {
            transition_timeout: Duration::from_millis(200),
            hold_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
            max_poll_interval: Duration::from_millis(5),
            mismatch_retries: 1,
            max_steps: 8,
        }
    }

    /// Idle, three review screens, idle again after the review
    pub fn nano_review() -> ScriptedDevice {
        ScriptedDevice::new(
            vec![
                screen(0, &["Cosmos", "is ready"]),
                screen(1, &["Address", "cro12w38"]),
                screen(2, &["Path", "m/44'/394'/5'/0/3"]),
                screen(3, &["APPROVE"]),
                screen(4, &["REJECT"]),
                screen(0, &["Cosmos", "is ready"]),
            ],
            vec![
                (1, Gesture::Right, 2),
                (2, Gesture::Right, 3),
                (3, Gesture::Right, 4),
                (3, Gesture::Both, 5),
                (4, Gesture::Both, 5),
            ],
            // The request is already showing its first screen
            1,
        )
    }
}
