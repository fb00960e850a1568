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

use model::reply::{decode, ReplyBody};
use model::{AddressReply, AppInfo, Command, DerivationPath, Response, SignatureReply, Version};

use crate::link::{ApduLink, LinkError};

/// Typed client for the Cosmos app
pub struct CosmosApp<'a> {
    link: &'a ApduLink,
}

impl<'a> CosmosApp<'a> {
    pub fn new(link: &'a ApduLink) -> Self {
        CosmosApp { link }
    }

    /// Send every frame of `command` and decode the final reply
    pub async fn execute<T: ReplyBody>(&self, command: Command) -> Result<Response<T>, LinkError> {
        let frames = command.frames()?;
        let raw = self.link.exchange_all(&frames).await?;
        Ok(decode(command.kind(), &raw)?)
    }

    pub async fn get_version(&self) -> Result<Response<Version>, LinkError> {
        self.execute(Command::GetVersion).await
    }

    pub async fn app_info(&self) -> Result<Response<AppInfo>, LinkError> {
        self.execute(Command::AppInfo).await
    }

    pub async fn get_address_and_pubkey(
        &self,
        path: impl Into<DerivationPath>,
        hrp: &str,
    ) -> Result<Response<AddressReply>, LinkError> {
        self.execute(Command::GetAddress {
            path: path.into(),
            hrp: hrp.to_string(),
        })
        .await
    }

    /// Same as `get_address_and_pubkey`, but the device asks the user to
    /// confirm the address first
    pub async fn show_address_and_pubkey(
        &self,
        path: impl Into<DerivationPath>,
        hrp: &str,
    ) -> Result<Response<AddressReply>, LinkError> {
        self.execute(Command::ShowAddress {
            path: path.into(),
            hrp: hrp.to_string(),
        })
        .await
    }

    pub async fn sign(
        &self,
        path: impl Into<DerivationPath>,
        payload: &[u8],
    ) -> Result<Response<SignatureReply>, LinkError> {
        self.execute(Command::Sign {
            path: path.into(),
            payload: payload.to_vec(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::testing::fake_device;

    use model::address::bech32_address;
    use model::{FrameError, StatusWord};
    use tokio::io::duplex;

    fn generator() -> Vec<u8> {
        hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798").unwrap()
    }

    #[tokio::test]
    async fn test_get_address() {
        let pk = generator();
        let address = bech32_address("cro", &pk).unwrap();
        let mut reply = pk.clone();
        reply.extend_from_slice(address.as_bytes());
        reply.extend_from_slice(&[0x90, 0x00]);

        let (harness, device) = duplex(1024);
        let device = tokio::spawn(fake_device(device, vec![reply]));
        let link = ApduLink::new(harness);

        let resp = CosmosApp::new(&link)
            .get_address_and_pubkey(DerivationPath::new([44, 394, 5, 0, 3]), "cro")
            .await
            .unwrap();
        assert_eq!(resp.return_code(), 0x9000);
        assert_eq!(resp.error_message(), "No errors");

        let body = resp.body.unwrap();
        assert_eq!(body.compressed_pk, pk);
        assert_eq!(body.bech32_address, address);

        let received = device.await.unwrap();
        assert_eq!(&received[0][..4], &[0x55, 0x04, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_rejected_show_address() {
        let (harness, device) = duplex(1024);
        let device = tokio::spawn(fake_device(device, vec![vec![0x69, 0x86]]));
        let link = ApduLink::new(harness);

        let resp = CosmosApp::new(&link)
            .show_address_and_pubkey(DerivationPath::new([44, 394, 5, 0, 3]), "cro")
            .await
            .unwrap();
        assert_eq!(resp.status, StatusWord::TRANSACTION_REJECTED);
        assert_eq!(resp.error_message(), "Transaction rejected");
        assert!(resp.body.is_none());

        let received = device.await.unwrap();
        assert_eq!(received[0][2], 0x01);
    }

    #[tokio::test]
    async fn test_truncated_reply_is_integrity_fault() {
        let (harness, device) = duplex(1024);
        tokio::spawn(fake_device(device, vec![vec![0x02, 0x79, 0x90, 0x00]]));
        let link = ApduLink::new(harness);

        let err = CosmosApp::new(&link)
            .get_address_and_pubkey(DerivationPath::new([44, 394, 5, 0, 3]), "cro")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Frame(FrameError::Truncated { got: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_sign() {
        let der = vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01];
        let mut last = der.clone();
        last.extend_from_slice(&[0x90, 0x00]);

        let (harness, device) = duplex(4096);
        let device = tokio::spawn(fake_device(
            device,
            vec![vec![0x90, 0x00], vec![0x90, 0x00], last],
        ));
        let link = ApduLink::new(harness);

        let payload = vec![b'x'; 260];
        let resp = CosmosApp::new(&link)
            .sign(DerivationPath::new([44, 394, 0, 0, 0]), &payload)
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.body.unwrap().signature, der);

        let received = device.await.unwrap();
        let p1 = received.iter().map(|f| f[2]).collect::<Vec<_>>();
        assert_eq!(p1, vec![0, 1, 2]);
        assert_eq!(received[1].len(), 5 + 250);
        assert_eq!(received[2].len(), 5 + 10);
    }
}
