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

//! Drive the Cosmos app through the device emulator: exchange APDUs, walk the
//! review screens, compare them against reference snapshots and check the
//! signatures the device produces.

pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub mod app;
pub mod link;
pub mod navigation;
pub mod scenarios;
pub mod session;
pub mod utils;
pub mod verify;

#[cfg(all(test, feature = "functional-tests"))]
mod tests;
