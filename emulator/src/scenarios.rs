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

//! Scenario catalogue: every behavior checked on every device model.

use core::fmt;
use std::path::PathBuf;

use futures::TryFutureExt;
use serde_json::json;

use model::address::bech32_address;
use model::reply::ReplyBody;
use model::{AddressReply, Command, DerivationPath, Response, SignatureReply, StatusWord};

use crate::app::CosmosApp;
use crate::navigation::{ApprovalFlow, DeviceUi, Navigator};
use crate::session::Session;
use crate::utils::model::{
    ApprovalConfig, ApproveAction, HardwareVariant, NavigationConfig, SessionConfig, TestLog,
};
use crate::utils::report::{get_temp_dir, render_report, report_path, HtmlReport};
use crate::utils::snapshot::{Snapshot, SnapshotStore};

pub const HRP: &str = "cro";

/// First three components are hardened by the codec
pub const ADDRESS_PATH: [u32; 5] = [44, 394, 5, 0, 3];
pub const SIGN_PATH: [u32; 5] = [44, 394, 0, 0, 0];
/// Only accepted in expert mode
pub const HUGE_PATH: [u32; 5] = [44, 394, 2147483647, 0, 4294967295];

pub const EXPECTED_ADDRESS: &str = "cro12w3875w2a3qqqpheslfznf4e270jm005j098sg";
pub const EXPECTED_HUGE_ADDRESS: &str = "cro1gp7crpcy9quz7wackt56htrgy67yj09wlxut2r";

pub fn example_tx_basic() -> Vec<u8> {
    json!({
        "account_number": "108",
        "chain_id": "test",
        "fee": {
            "amount": [{ "amount": "600", "denom": "basecro" }],
            "gas": "200000"
        },
        "memo": "",
        "msgs": [
            {
                "type": "cosmos-sdk/MsgWithdrawDelegationReward",
                "value": {
                    "delegator_address": "cro1w34k53py5v5xyluazqpq65agyajavep2rflq6h",
                    "validator_address": "crovaloper1kn3wugetjuy4zetlq6wadchfhvu3x740ae6z6x"
                }
            },
            {
                "type": "cosmos-sdk/MsgWithdrawDelegationReward",
                "value": {
                    "delegator_address": "cro1w34k53py5v5xyluazqpq65agyajavep2rflq6h",
                    "validator_address": "crovaloper1sjllsnramtg3ewxqwwrwjxfgc4n4ef9u2lcnj0"
                }
            }
        ],
        "sequence": "106"
    })
    .to_string()
    .into_bytes()
}

pub fn example_tx_expert() -> Vec<u8> {
    json!({
        "account_number": "108",
        "chain_id": "test-2",
        "fee": {
            "amount": [{ "amount": "600", "denom": "basecro" }],
            "gas": "200000"
        },
        "memo": "",
        "msgs": [
            {
                "type": "cosmos-sdk/MsgWithdrawDelegationReward",
                "value": {
                    "delegator_address": "cro1kky4yzth6gdrm8ga5zlfwhav33yr7hl87jycah",
                    "validator_address": "crovaloper1kn3wugetjuy4zetlq6wadchfhvu3x740ae6z6x"
                }
            },
            {
                "type": "cosmos-sdk/MsgWithdrawDelegationReward",
                "value": {
                    "delegator_address": "cro1kky4yzth6gdrm8ga5zlfwhav33yr7hl87jycah",
                    "validator_address": "crovaloper1sjllsnramtg3ewxqwwrwjxfgc4n4ef9u2lcnj0"
                }
            }
        ],
        "sequence": "106"
    })
    .to_string()
    .into_bytes()
}

pub fn example_tx_combined() -> Vec<u8> {
    json!({
        "account_number": "108",
        "chain_id": "test",
        "fee": {
            "amount": [{ "amount": "600", "denom": "basecro" }],
            "gas": "200000"
        },
        "memo": "",
        "msgs": [
            {
                "type": "cosmos-sdk/MsgWithdrawDelegationReward",
                "value": {
                    "delegator_address": "cro1w34k53py5v5xyluazqpq65agyajavep2rflq6h",
                    "validator_address": "crovaloper1648ynlpdw7fqa2axt0w2yp3fk542junl7rsvq6"
                }
            },
            {
                "type": "cosmos-sdk/MsgDelegate",
                "value": {
                    "amount": { "amount": "20139397", "denom": "basecro" },
                    "delegator_address": "cro1w34k53py5v5xyluazqpq65agyajavep2rflq6h",
                    "validator_address": "crovaloper1648ynlpdw7fqa2axt0w2yp3fk542junl7rsvq6"
                }
            }
        ],
        "sequence": "106"
    })
    .to_string()
    .into_bytes()
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioFailure {
    #[error("{model}: expected {what} {expected}, got {actual}")]
    Mismatch {
        model: &'static str,
        what: &'static str,
        expected: String,
        actual: String,
    },
    #[error("{model}: successful reply without {what}")]
    MissingBody {
        model: &'static str,
        what: &'static str,
    },
    #[error("{model}: signature doesn't verify against the reported key")]
    BadSignature { model: &'static str },
}

fn expect_eq<T: PartialEq + fmt::Debug>(
    model: &HardwareVariant,
    what: &'static str,
    expected: T,
    actual: T,
) -> Result<(), ScenarioFailure> {
    if expected != actual {
        return Err(ScenarioFailure::Mismatch {
            model: model.name,
            what,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        });
    }
    Ok(())
}

fn expect_status<T>(
    model: &HardwareVariant,
    resp: &Response<T>,
    expected: StatusWord,
) -> Result<(), ScenarioFailure> {
    expect_eq(model, "status", expected, resp.status)?;
    expect_eq(
        model,
        "error message",
        expected.description(),
        resp.error_message(),
    )
}

fn take_body<T>(
    model: &HardwareVariant,
    resp: Response<T>,
    what: &'static str,
) -> Result<T, ScenarioFailure> {
    resp.body.ok_or(ScenarioFailure::MissingBody {
        model: model.name,
        what,
    })
}

/// Key length, expected address, and that the address belongs to the key
fn expect_address(
    model: &HardwareVariant,
    reply: &AddressReply,
    expected: &str,
) -> Result<(), crate::Error> {
    expect_eq(model, "public key length", 33, reply.compressed_pk.len())?;
    expect_eq(model, "address", expected, reply.bech32_address.as_str())?;
    let derived = bech32_address(HRP, &reply.compressed_pk)?;
    expect_eq(
        model,
        "address derived from the key",
        reply.bech32_address.as_str(),
        derived.as_str(),
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Context {
    pub session: SessionConfig,
    pub store: SnapshotStore,
    pub navigation: NavigationConfig,
    pub report: HtmlReport,
    /// Defaults to `REPORT_TMP_DIR` or a temp directory
    pub report_dir: Option<PathBuf>,
}

impl Context {
    pub fn from_env() -> Self {
        Context {
            session: SessionConfig::from_env(),
            store: SnapshotStore::from_env(),
            navigation: NavigationConfig::default(),
            report: HtmlReport::OnlyFailing,
            report_dir: None,
        }
    }
}

/// One navigation pass: which series it belongs to, the screen it leaves and
/// how it ends
pub struct Review<'a> {
    pub label: &'a str,
    pub idle: &'a Snapshot,
    pub start_index: usize,
    pub flow: ApprovalFlow,
}

/// Issue `command` and drive the review it triggers.
///
/// The request is polled first and navigation runs alongside it. If the
/// navigation fails the pending request is dropped.
pub async fn reviewed_request<T, U>(
    app: &CosmosApp<'_>,
    ui: &mut U,
    model: &'static HardwareVariant,
    ctx: &Context,
    log: &mut TestLog,
    review: Review<'_>,
    command: Command,
) -> Result<(Response<T>, usize), crate::Error>
where
    T: ReplyBody + Send,
    U: DeviceUi + ?Sized,
{
    let mut navigator = Navigator::new(ui, model, &ctx.store, &ctx.navigation, review.label, log);

    let (resp, next) = tokio::try_join!(
        app.execute::<T>(command).map_err(crate::Error::from),
        navigator
            .approval_pass(review.idle, review.start_index, &review.flow)
            .map_err(crate::Error::from),
    )?;
    log::info!("{:?}", resp);

    Ok((resp, next))
}

/// `reviewed_request` on the screen of a running session
async fn interactive<T: ReplyBody + Send>(
    session: &mut Session,
    ctx: &Context,
    log: &mut TestLog,
    review: Review<'_>,
    command: Command,
) -> Result<(Response<T>, usize), crate::Error> {
    let model = session.model();
    let (app, screen, _) = session.split();
    reviewed_request(&app, screen, model, ctx, log, review, command).await
}

/// Address review approved as configured, then the signing review of the same
/// series from the model's second-pass index, approved with the signing
/// action. The text events of the first pass are dropped in between.
#[allow(clippy::too_many_arguments)]
pub async fn show_then_sign<U: DeviceUi + ?Sized>(
    app: &CosmosApp<'_>,
    ui: &mut U,
    approval: &mut ApprovalConfig,
    model: &'static HardwareVariant,
    ctx: &Context,
    log: &mut TestLog,
    label: &str,
    idle: &Snapshot,
    tx: &[u8],
) -> Result<(), crate::Error> {
    let path = DerivationPath::new(SIGN_PATH);

    let (resp_pk, next) = reviewed_request::<AddressReply, U>(
        app,
        ui,
        model,
        ctx,
        log,
        Review {
            label,
            idle,
            start_index: 0,
            flow: ApprovalFlow::approve(approval),
        },
        Command::ShowAddress {
            path,
            hrp: HRP.into(),
        },
    )
    .await?;
    expect_status(model, &resp_pk, StatusWord::NO_ERROR)?;
    let address = take_body(model, resp_pk, "address")?;

    if next != model.sign_after_show_start {
        log::debug!(
            "{}: address review ended at {}, signing review starts at {}",
            model,
            next,
            model.sign_after_show_start
        );
    }
    ui.delete_events().await?;
    *approval = ApprovalConfig {
        action: ApproveAction::Hold,
        keyword: model.keywords.sign.to_string(),
    };

    let (resp, _) = reviewed_request::<SignatureReply, U>(
        app,
        ui,
        model,
        ctx,
        log,
        Review {
            label,
            idle,
            start_index: model.sign_after_show_start,
            flow: ApprovalFlow::approve(approval),
        },
        Command::Sign {
            path,
            payload: tx.to_vec(),
        },
    )
    .await?;

    expect_valid_signature(model, tx, resp, &address.compressed_pk)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Scenario {
    StartStop,
    GetVersion,
    GetAppInfo,
    GetAddress,
    ShowAddress,
    ShowAddressReject,
    ShowAddressHuge,
    ShowAddressHugeExpert,
    SignBasic,
    SignBasicCombined,
    SignExpert,
    ShowAddressSignBasic,
}

impl Scenario {
    pub const ALL: [Scenario; 12] = [
        Scenario::StartStop,
        Scenario::GetVersion,
        Scenario::GetAppInfo,
        Scenario::GetAddress,
        Scenario::ShowAddress,
        Scenario::ShowAddressReject,
        Scenario::ShowAddressHuge,
        Scenario::ShowAddressHugeExpert,
        Scenario::SignBasic,
        Scenario::SignBasicCombined,
        Scenario::SignExpert,
        Scenario::ShowAddressSignBasic,
    ];

    /// Also the snapshot label of the interactive scenarios
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::StartStop => "start_stop",
            Scenario::GetVersion => "get_version",
            Scenario::GetAppInfo => "get_app_info",
            Scenario::GetAddress => "get_address",
            Scenario::ShowAddress => "show_address",
            Scenario::ShowAddressReject => "show_address_reject",
            Scenario::ShowAddressHuge => "show_address_huge",
            Scenario::ShowAddressHugeExpert => "show_address_huge_expert",
            Scenario::SignBasic => "sign_basic",
            Scenario::SignBasicCombined => "sign_basic_combined",
            Scenario::SignExpert => "sign_expert",
            Scenario::ShowAddressSignBasic => "show_address_sign_basic",
        }
    }

    /// Approval settings the session starts with
    pub fn approval(&self, model: &HardwareVariant) -> ApprovalConfig {
        let (action, keyword) = match self {
            Scenario::ShowAddress | Scenario::ShowAddressSignBasic => {
                (ApproveAction::Tap, model.keywords.show_address)
            }
            Scenario::ShowAddressHugeExpert => (ApproveAction::Tap, model.keywords.show_path),
            Scenario::SignBasic | Scenario::SignBasicCombined | Scenario::SignExpert => {
                (ApproveAction::Hold, model.keywords.sign)
            }
            _ => return ApprovalConfig::default(),
        };

        ApprovalConfig {
            action,
            keyword: keyword.to_string(),
        }
    }

    /// Open a session, run the scenario and close the session whatever the
    /// outcome. Renders the HTML report according to `ctx.report`.
    pub async fn run(self, model: &'static HardwareVariant, ctx: &Context) -> Result<(), crate::Error> {
        log::info!("{} on {}", self.name(), model);

        let config = ctx.session.clone().with_approval(self.approval(model));

        let mut log = TestLog::new(model, self.name());
        let mut session = Session::open(model, config).await?;
        let result = self.body(&mut session, ctx, &mut log).await;

        log.log_lines = session.drain_logs();
        let closed = session.close().await;

        log.result = result.is_ok();
        if ctx.report.should_render(&log) {
            let dir = match &ctx.report_dir {
                Some(dir) => dir.clone(),
                None => get_temp_dir()?,
            };
            let to = report_path(&dir, &log);
            if let Err(e) = render_report(&to, &log) {
                log::warn!("Can't render report to {}: {}", to.display(), e);
            }
        }

        result?;
        closed?;
        Ok(())
    }

    async fn body(
        &self,
        session: &mut Session,
        ctx: &Context,
        log: &mut TestLog,
    ) -> Result<(), crate::Error> {
        match self {
            Scenario::StartStop => Ok(()),
            Scenario::GetVersion => get_version(session).await,
            Scenario::GetAppInfo => get_app_info(session).await,
            Scenario::GetAddress => get_address(session).await,
            Scenario::ShowAddress => show_address(session, ctx, log).await,
            Scenario::ShowAddressReject => show_address_reject(session, ctx, log).await,
            Scenario::ShowAddressHuge => show_address_huge(session).await,
            Scenario::ShowAddressHugeExpert => show_address_huge_expert(session, ctx, log).await,
            Scenario::SignBasic => sign(session, ctx, log, self.name(), example_tx_basic()).await,
            Scenario::SignBasicCombined => {
                sign(session, ctx, log, self.name(), example_tx_combined()).await
            }
            Scenario::SignExpert => sign(session, ctx, log, self.name(), example_tx_expert()).await,
            Scenario::ShowAddressSignBasic => show_address_sign_basic(session, ctx, log).await,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

async fn get_version(session: &mut Session) -> Result<(), crate::Error> {
    let model = session.model();
    let resp = session.app().get_version().await?;
    log::info!("{:?}", resp);

    expect_status(model, &resp, StatusWord::NO_ERROR)?;
    let version = take_body(model, resp, "version")?;
    log::info!(
        "{}: v{}.{}.{} (test mode: {})",
        model,
        version.major,
        version.minor,
        version.patch,
        version.test_mode
    );

    Ok(())
}

async fn get_app_info(session: &mut Session) -> Result<(), crate::Error> {
    let model = session.model();
    let resp = session.app().app_info().await?;
    log::info!("{:?}", resp);

    expect_status(model, &resp, StatusWord::NO_ERROR)?;
    let info = take_body(model, resp, "app info")?;
    log::info!("{}: {} {}", model, info.app_name, info.app_version);

    Ok(())
}

async fn get_address(session: &mut Session) -> Result<(), crate::Error> {
    let model = session.model();
    let resp = session
        .app()
        .get_address_and_pubkey(DerivationPath::new(ADDRESS_PATH), HRP)
        .await?;
    log::info!("{:?}", resp);

    expect_status(model, &resp, StatusWord::NO_ERROR)?;
    expect_address(model, &take_body(model, resp, "address")?, EXPECTED_ADDRESS)
}

async fn show_address(
    session: &mut Session,
    ctx: &Context,
    log: &mut TestLog,
) -> Result<(), crate::Error> {
    let model = session.model();
    let idle = session.main_menu().clone();
    let flow = ApprovalFlow::approve(session.approval());
    let (resp, _) = interactive::<AddressReply>(
        session,
        ctx,
        log,
        Review {
            label: "show_address",
            idle: &idle,
            start_index: 0,
            flow,
        },
        Command::ShowAddress {
            path: DerivationPath::new(ADDRESS_PATH),
            hrp: HRP.into(),
        },
    )
    .await?;

    expect_status(model, &resp, StatusWord::NO_ERROR)?;
    expect_address(model, &take_body(model, resp, "address")?, EXPECTED_ADDRESS)
}

async fn show_address_reject(
    session: &mut Session,
    ctx: &Context,
    log: &mut TestLog,
) -> Result<(), crate::Error> {
    let model = session.model();
    let idle = session.main_menu().clone();
    let (resp, _) = interactive::<AddressReply>(
        session,
        ctx,
        log,
        Review {
            label: "show_address_reject",
            idle: &idle,
            start_index: 0,
            flow: ApprovalFlow::reject(model),
        },
        Command::ShowAddress {
            path: DerivationPath::new(ADDRESS_PATH),
            hrp: HRP.into(),
        },
    )
    .await?;

    expect_status(model, &resp, StatusWord::TRANSACTION_REJECTED)?;
    Ok(())
}

async fn show_address_huge(session: &mut Session) -> Result<(), crate::Error> {
    let model = session.model();
    // Refused right away, nothing to navigate
    let resp = session
        .app()
        .show_address_and_pubkey(DerivationPath::new(HUGE_PATH), HRP)
        .await?;
    log::info!("{:?}", resp);

    expect_status(model, &resp, StatusWord::CONDITIONS_NOT_SATISFIED)?;
    Ok(())
}

async fn show_address_huge_expert(
    session: &mut Session,
    ctx: &Context,
    log: &mut TestLog,
) -> Result<(), crate::Error> {
    let label = "show_address_huge_expert";
    let model = session.model();

    let next = session
        .toggle_expert_mode(&ctx.store, &ctx.navigation, label, true, 0, log)
        .await?;
    let idle = session.capture_screen().await;
    let flow = ApprovalFlow::approve(session.approval());
    let (resp, _) = interactive::<AddressReply>(
        session,
        ctx,
        log,
        Review {
            label,
            idle: &idle,
            start_index: next,
            flow,
        },
        Command::ShowAddress {
            path: DerivationPath::new(HUGE_PATH),
            hrp: HRP.into(),
        },
    )
    .await?;

    expect_status(model, &resp, StatusWord::NO_ERROR)?;
    expect_address(
        model,
        &take_body(model, resp, "address")?,
        EXPECTED_HUGE_ADDRESS,
    )
}

fn expect_valid_signature(
    model: &HardwareVariant,
    tx: &[u8],
    resp: Response<SignatureReply>,
    pk: &[u8],
) -> Result<(), crate::Error> {
    expect_status(model, &resp, StatusWord::NO_ERROR)?;
    let signature = take_body(model, resp, "signature")?;

    if !crate::verify::verify(tx, &signature.signature, pk)? {
        return Err(ScenarioFailure::BadSignature { model: model.name }.into());
    }
    Ok(())
}

async fn sign(
    session: &mut Session,
    ctx: &Context,
    log: &mut TestLog,
    label: &str,
    tx: Vec<u8>,
) -> Result<(), crate::Error> {
    let model = session.model();
    let path = DerivationPath::new(SIGN_PATH);

    let resp_pk = session.app().get_address_and_pubkey(path, HRP).await?;
    log::info!("{:?}", resp_pk);
    expect_status(model, &resp_pk, StatusWord::NO_ERROR)?;
    let address = take_body(model, resp_pk, "address")?;

    let idle = session.main_menu().clone();
    let flow = ApprovalFlow::approve(session.approval());
    let (resp, _) = interactive::<SignatureReply>(
        session,
        ctx,
        log,
        Review {
            label,
            idle: &idle,
            start_index: 0,
            flow,
        },
        Command::Sign {
            path,
            payload: tx.clone(),
        },
    )
    .await?;

    expect_valid_signature(model, &tx, resp, &address.compressed_pk)
}

async fn show_address_sign_basic(
    session: &mut Session,
    ctx: &Context,
    log: &mut TestLog,
) -> Result<(), crate::Error> {
    let model = session.model();
    let idle = session.main_menu().clone();
    let (app, screen, approval) = session.split();

    show_then_sign(
        &app,
        screen,
        approval,
        model,
        ctx,
        log,
        "show_address_sign_basic",
        &idle,
        &example_tx_basic(),
    )
    .await
}
