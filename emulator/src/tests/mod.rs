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

use std::sync::Once;

use crate::scenarios::{Context, Scenario};
use crate::utils::model::HardwareVariant;

pub static INIT_LOG: Once = Once::new();

#[functional_test_wrapper::functional_test]
async fn start_stop(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
    Scenario::StartStop.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test]
async fn get_version(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
    Scenario::GetVersion.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test]
async fn get_app_info(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
    Scenario::GetAppInfo.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test]
async fn get_address(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
    Scenario::GetAddress.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test(timeout_secs = "60")]
async fn show_address(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
    Scenario::ShowAddress.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test(timeout_secs = "60")]
async fn show_address_reject(
    model: &'static HardwareVariant,
    ctx: Context,
) -> Result<(), crate::Error> {
    Scenario::ShowAddressReject.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test]
async fn show_address_huge(
    model: &'static HardwareVariant,
    ctx: Context,
) -> Result<(), crate::Error> {
    Scenario::ShowAddressHuge.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test(timeout_secs = "90")]
async fn show_address_huge_expert(
    model: &'static HardwareVariant,
    ctx: Context,
) -> Result<(), crate::Error> {
    Scenario::ShowAddressHugeExpert.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test(timeout_secs = "90")]
async fn sign_basic(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
    Scenario::SignBasic.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test(timeout_secs = "90")]
async fn sign_basic_combined(
    model: &'static HardwareVariant,
    ctx: Context,
) -> Result<(), crate::Error> {
    Scenario::SignBasicCombined.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test(timeout_secs = "90")]
async fn sign_expert(model: &'static HardwareVariant, ctx: Context) -> Result<(), crate::Error> {
    Scenario::SignExpert.run(model, &ctx).await
}

#[functional_test_wrapper::functional_test(timeout_secs = "120")]
async fn show_address_sign_basic(
    model: &'static HardwareVariant,
    ctx: Context,
) -> Result<(), crate::Error> {
    Scenario::ShowAddressSignBasic.run(model, &ctx).await
}
