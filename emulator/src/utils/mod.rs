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

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, ChildStderr, Command as ProcessCommand};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::link::ScreenStream;

pub mod model;
pub mod report;
pub mod snapshot;

use self::model::{HardwareVariant, SessionConfig};
use self::snapshot::Snapshot;

pub struct EmulatorProcess {
    pub child: Child,
    pub stderr: Option<ChildStderr>,
    pub apdu: TcpStream,
    pub screen: TcpStream,
    pub input: TcpStream,
}

fn emulator_args(
    model: &HardwareVariant,
    config: &SessionConfig,
    apdu: u16,
    screen: u16,
    input: u16,
) -> Vec<String> {
    vec![
        "--model".into(),
        model.name.into(),
        "--seed".into(),
        config.seed.clone(),
        "--display".into(),
        if config.headless { "headless" } else { "qt" }.into(),
        "--apdu-port".into(),
        apdu.to_string(),
        "--screen-port".into(),
        screen.to_string(),
        "--input-port".into(),
        input.to_string(),
        model.elf.display().to_string(),
    ]
}

/// Spawn the emulator and wait for it to connect to the three channels.
///
/// Fails if the process exits first or doesn't connect within
/// `config.startup_timeout`.
pub async fn get_emulator_instance(
    model: &HardwareVariant,
    config: &SessionConfig,
) -> Result<EmulatorProcess, crate::session::SessionError> {
    use crate::session::SessionError;

    log::trace!("Spawning emulator for {}...", model);

    let stderr = if config.join_logs {
        Stdio::inherit()
    } else {
        Stdio::piped()
    };

    let apdu = TcpListener::bind("127.0.0.1:0").await?;
    let screen = TcpListener::bind("127.0.0.1:0").await?;
    let input = TcpListener::bind("127.0.0.1:0").await?;

    let args = emulator_args(
        model,
        config,
        apdu.local_addr()?.port(),
        screen.local_addr()?.port(),
        input.local_addr()?.port(),
    );
    log::trace!("Emulator args: {:?}", args);

    let mut child = ProcessCommand::new(&config.emulator)
        .kill_on_drop(true)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(stderr)
        .spawn()
        .map_err(|e| SessionError::Spawn {
            emulator: config.emulator.display().to_string(),
            source: e,
        })?;
    let stderr = child.stderr.take();

    // Wait for the emulator to connect
    let connect = async {
        let (apdu, screen, input) = futures::join!(apdu.accept(), screen.accept(), input.accept());
        Ok::<_, std::io::Error>((apdu?.0, screen?.0, input?.0))
    };
    let connected = tokio::select! {
        connected = tokio::time::timeout(config.startup_timeout, connect) => connected,
        status = child.wait() => {
            return Err(SessionError::Exited {
                model: model.name,
                status: status?.to_string(),
            });
        }
    };

    let (apdu, screen, input) = match connected {
        Ok(streams) => streams?,
        Err(_) => {
            return Err(SessionError::StartupTimeout {
                model: model.name,
                timeout: config.startup_timeout,
            })
        }
    };

    Ok(EmulatorProcess {
        child,
        stderr,
        apdu,
        screen,
        input,
    })
}

pub struct SupportTasks {
    pub logs: mpsc::UnboundedReceiver<String>,
    pub screen: Arc<Mutex<Snapshot>>,
    pub display_update: mpsc::UnboundedReceiver<()>,
    pub handles: Vec<JoinHandle<()>>,
}

pub fn spawn_support_tasks<R: AsyncRead + Unpin + Send + 'static>(
    screen_stream: R,
    log: Option<ChildStderr>,
) -> SupportTasks {
    let (display_sender, display_update) = mpsc::unbounded_channel();

    let screen = Arc::new(Mutex::new(Snapshot::default()));
    let mut screen_stream = ScreenStream(screen_stream);
    let screen_cloned = Arc::clone(&screen);
    let screen_task = tokio::spawn(async move {
        loop {
            match screen_stream.update_screen(&screen_cloned).await {
                Err(e) => {
                    log::debug!("Screen stream closed: {:?}", e);
                    break;
                }
                Ok(false) => continue,
                Ok(true) => {
                    if display_sender.send(()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (log_sender, logs) = mpsc::unbounded_channel();
    let log_task = tokio::spawn(async move {
        if let Some(log) = log {
            let mut bufreader = BufReader::new(log);
            let mut s = String::new();
            loop {
                s.clear();
                match bufreader.read_line(&mut s).await {
                    Ok(0) | Err(_) => {
                        log::debug!("Log stream closed");
                        break;
                    }
                    Ok(_) => {}
                }
                let line = s.trim().to_string();
                log::trace!("Log line: {}", line);
                if log_sender.send(line).is_err() {
                    break;
                }
            }
        }
    });

    SupportTasks {
        logs,
        screen,
        display_update,
        handles: vec![screen_task, log_task],
    }
}

pub fn try_pull_msg<T>(s: &mut mpsc::UnboundedReceiver<T>) -> Result<Option<T>, String> {
    match s.try_recv() {
        Ok(v) => Ok(Some(v)),
        Err(mpsc::error::TryRecvError::Empty) => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

pub fn check_elf(model: &HardwareVariant) -> Result<(), crate::Error> {
    if !Path::new(&model.elf).is_file() {
        return Err(format!("App for {} not found at {}", model, model.elf.display()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::model::{get_model, ModelKind};

    #[test]
    fn test_emulator_args() {
        let model = get_model(ModelKind::Stax);
        let config = SessionConfig::default();
        let args = emulator_args(model, &config, 1000, 1001, 1002);

        assert_eq!(&args[..4], &["--model", "stax", "--seed", crate::utils::model::APP_SEED]);
        assert_eq!(&args[4..6], &["--display", "headless"]);
        assert_eq!(
            &args[6..12],
            &["--apdu-port", "1000", "--screen-port", "1001", "--input-port", "1002"]
        );
        assert!(args[12].ends_with("stax/bin/app.elf"));
    }

    #[test]
    fn test_try_pull_msg() {
        let (s, mut r) = mpsc::unbounded_channel();
        assert_eq!(try_pull_msg::<u8>(&mut r), Ok(None));
        s.send(1).unwrap();
        assert_eq!(try_pull_msg(&mut r), Ok(Some(1)));
        drop(s);
        assert!(try_pull_msg(&mut r).is_err());
    }
}
