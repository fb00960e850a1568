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

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use model::apdu::{ApduCommand, ApduResponse};
use model::emulator::InputMessage;

use crate::app::CosmosApp;
use crate::link::ApduLink;
use crate::navigation::{expand, DeviceUi, NavigationError, Navigator};
use crate::utils::model::{
    ApprovalConfig, HardwareVariant, InputStep, NavigationConfig, SessionConfig, TestLog,
};
use crate::utils::snapshot::{Snapshot, SnapshotStore};
use crate::utils::{get_emulator_instance, spawn_support_tasks, try_pull_msg, EmulatorProcess};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("can't start emulator `{emulator}`: {source}")]
    Spawn {
        emulator: String,
        source: std::io::Error,
    },
    #[error("{model}: emulator exited during startup ({status})")]
    Exited { model: &'static str, status: String },
    #[error("{model}: emulator not ready within {timeout:?}")]
    StartupTimeout {
        model: &'static str,
        timeout: Duration,
    },
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Screen and input channels of a running emulator
pub struct DeviceScreen {
    screen: Arc<Mutex<Snapshot>>,
    display_update: mpsc::UnboundedReceiver<()>,
    input: TcpStream,
}

impl DeviceScreen {
    pub async fn snapshot(&mut self) -> Snapshot {
        while let Ok(Some(_)) = try_pull_msg(&mut self.display_update) {}
        self.screen.lock().await.clone()
    }

    /// Wait for the next frame. `false` on timeout or if the emulator hung up.
    pub async fn wait_update(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.display_update.recv()).await,
            Ok(Some(_))
        )
    }

    pub async fn send_input(&mut self, input: InputMessage) -> std::io::Result<()> {
        self.input.write_all(&input.encode()).await?;
        self.input.flush().await
    }
}

#[async_trait]
impl DeviceUi for DeviceScreen {
    async fn capture(&mut self) -> Result<Snapshot, crate::Error> {
        Ok(self.snapshot().await)
    }

    async fn input(&mut self, input: InputMessage) -> Result<(), crate::Error> {
        self.send_input(input).await?;
        Ok(())
    }

    async fn delete_events(&mut self) -> Result<(), crate::Error> {
        self.screen.lock().await.texts.clear();
        Ok(())
    }
}

/// One emulator process running the app for one model.
///
/// The process is stopped by `close()` or, failing that, when the session is
/// dropped.
pub struct Session {
    model: &'static HardwareVariant,
    config: SessionConfig,
    link: ApduLink,
    screen: DeviceScreen,
    main_menu: Snapshot,
    logs: mpsc::UnboundedReceiver<String>,
    tasks: Vec<JoinHandle<()>>,
    child: Option<Child>,
}

impl Session {
    pub async fn open(
        model: &'static HardwareVariant,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let EmulatorProcess {
            child,
            stderr,
            apdu,
            screen,
            input,
        } = get_emulator_instance(model, &config).await?;

        let support = spawn_support_tasks(screen, stderr);
        let mut session = Session {
            model,
            link: ApduLink::new(apdu),
            screen: DeviceScreen {
                screen: support.screen,
                display_update: support.display_update,
                input,
            },
            main_menu: Snapshot::default(),
            logs: support.logs,
            tasks: support.handles,
            child: Some(child),
            config,
        };

        if !session.screen.wait_update(session.config.startup_timeout).await {
            let timeout = session.config.startup_timeout;
            session.close().await?;
            return Err(SessionError::StartupTimeout {
                model: model.name,
                timeout,
            });
        }

        tokio::time::sleep(session.config.start_delay).await;
        session.main_menu = session.screen.snapshot().await;
        log::debug!(
            "{}: started, main menu is {}x{}",
            model,
            session.main_menu.width,
            session.main_menu.height
        );

        Ok(session)
    }

    pub fn model(&self) -> &'static HardwareVariant {
        self.model
    }

    pub fn main_menu(&self) -> &Snapshot {
        &self.main_menu
    }

    pub fn approval(&self) -> &ApprovalConfig {
        &self.config.approval
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    pub fn is_closed(&self) -> bool {
        self.child.is_none()
    }

    pub fn app(&self) -> CosmosApp<'_> {
        CosmosApp::new(&self.link)
    }

    /// The app client, the device screen and the approval settings of the
    /// following passes, to navigate while a request is pending
    pub fn split(&mut self) -> (CosmosApp<'_>, &mut DeviceScreen, &mut ApprovalConfig) {
        (
            CosmosApp::new(&self.link),
            &mut self.screen,
            &mut self.config.approval,
        )
    }

    pub async fn send(&self, frame: &ApduCommand) -> Result<ApduResponse, crate::Error> {
        if self.is_closed() {
            return Err(SessionError::Closed.into());
        }
        Ok(self.link.exchange(frame).await?)
    }

    pub async fn capture_screen(&mut self) -> Snapshot {
        self.screen.snapshot().await
    }

    pub async fn press_input(&mut self, step: InputStep) -> Result<(), crate::Error> {
        if self.is_closed() {
            return Err(SessionError::Closed.into());
        }
        for input in expand(step) {
            self.screen.send_input(input).await?;
        }
        Ok(())
    }

    pub fn navigator<'a>(
        &'a mut self,
        store: &'a SnapshotStore,
        config: &'a NavigationConfig,
        label: &str,
        log: &'a mut TestLog,
    ) -> Navigator<'a, DeviceScreen> {
        Navigator::new(&mut self.screen, self.model, store, config, label, log)
    }

    /// Switch expert mode through the settings menu, comparing every screen
    /// with the `label` series from `start_index`. Returns the next index.
    pub async fn toggle_expert_mode(
        &mut self,
        store: &SnapshotStore,
        config: &NavigationConfig,
        label: &str,
        enable: bool,
        start_index: usize,
        log: &mut TestLog,
    ) -> Result<usize, NavigationError> {
        self.navigator(store, config, label, log)
            .toggle_expert_mode(enable, start_index)
            .await
    }

    pub fn drain_logs(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.logs.try_recv().ok()).collect()
    }

    /// Stop the emulator. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };

        log::debug!("{}: stopping emulator", self.model);
        for task in self.tasks.drain(..) {
            task.abort();
        }

        match child.try_wait()? {
            Some(status) => log::debug!("{}: emulator already exited ({})", self.model, status),
            None => child.kill().await?,
        }

        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
