// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trusted input APDUs
//!
//! A previous transaction is streamed to the device split on field boundaries,
//! no APDU crosses from one field group into the next:
//!
//! ```text
//! APDU 0:        OUTPUT_INDEX (BE u32) ‖ VERSION (LE u32) ‖ INPUT_COUNT (varint)
//! per input:     PREV_HASH (32) ‖ PREV_INDEX (LE u32) ‖ SCRIPT_LEN (varint)
//!                SCRIPT ‖ SEQUENCE (LE u32), in chunks of at most 255 bytes
//! then:          OUTPUT_COUNT (varint)
//! per output:    AMOUNT (LE u64) ‖ SCRIPT_LEN (varint)
//!                SCRIPT, in chunks of at most 255 bytes
//! final APDU:    LOCK_TIME (LE u32)
//! ```
//!
//! The first APDU uses `P1 = 0x00`, subsequent APDUs `P1 = 0x80`. Intermediate
//! responses are empty, the final response holds the 56-byte trusted input.

use encdec::{DecodeOwned, Encode};

use super::{chunks, P1_FIRST, P1_NEXT};
use crate::{
    tx::Transaction, write_varint, Apdu, ApduError, ApduStatic, Instruction, DONGLE_APDU_CLA,
};

/// Marker type for the trusted input instruction
pub struct TrustedInputReq;

impl ApduStatic for TrustedInputReq {
    const CLA: u8 = DONGLE_APDU_CLA;
    const INS: u8 = Instruction::GetTrustedInput as u8;
}

/// Split a transaction into trusted input request payloads
pub fn trusted_input_chunks(tx: &Transaction, output_index: u32) -> Vec<Vec<u8>> {
    let mut out = vec![];

    // Output index, version and input count
    let mut first = output_index.to_be_bytes().to_vec();
    first.extend_from_slice(&tx.version.to_le_bytes());
    write_varint(&mut first, tx.inputs.len() as u64);
    out.push(first);

    // Inputs
    for i in &tx.inputs {
        out.push(i.header());
        out.extend(chunks(&i.tail()).map(|c| c.to_vec()));
    }

    // Output count
    let mut count = vec![];
    write_varint(&mut count, tx.outputs.len() as u64);
    out.push(count);

    // Outputs
    for o in &tx.outputs {
        out.push(o.header());
        out.extend(chunks(&o.script).map(|c| c.to_vec()));
    }

    // Lock time
    out.push(tx.lock_time.to_le_bytes().to_vec());

    out
}

/// Build the trusted input APDU stream for a raw transaction
pub fn trusted_input_apdus(raw_tx: &[u8], output_index: u32) -> Result<Vec<Apdu>, ApduError> {
    let tx = Transaction::parse(raw_tx)?;

    if output_index as usize >= tx.outputs.len() {
        return Err(ApduError::InvalidEncoding);
    }

    trusted_input_chunks(&tx, output_index)
        .into_iter()
        .enumerate()
        .map(|(i, data)| {
            let p1 = if i == 0 { P1_FIRST } else { P1_NEXT };
            Apdu::new(TrustedInputReq::CLA, TrustedInputReq::INS, p1, 0x00, data)
        })
        .collect()
}

/// Trusted input length
pub const TRUSTED_INPUT_LEN: usize = 56;

/// Opaque device-signed trusted input
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TrustedInput(pub [u8; TRUSTED_INPUT_LEN]);

impl TrustedInput {
    pub const LEN: usize = TRUSTED_INPUT_LEN;
}

impl AsRef<[u8]> for TrustedInput {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Encode for TrustedInput {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(Self::LEN)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < Self::LEN {
            return Err(ApduError::InvalidLength);
        }
        buff[..Self::LEN].copy_from_slice(&self.0);
        Ok(Self::LEN)
    }
}

impl DecodeOwned for TrustedInput {
    type Output = Self;
    type Error = ApduError;

    /// Decode a trusted input, the response must be exactly 56 bytes
    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() != Self::LEN {
            return Err(ApduError::InvalidLength);
        }
        let mut b = [0u8; Self::LEN];
        b.copy_from_slice(buff);
        Ok((Self(b), Self::LEN))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{test::encode_decode_apdu, tx::test::example_tx, MAX_APDU_DATA};

    fn raw(tx: &Transaction) -> Vec<u8> {
        let mut b = vec![0u8; tx.encode_len().unwrap()];
        tx.encode(&mut b).unwrap();
        b
    }

    #[test]
    fn trusted_input_field_boundaries() {
        let tx = example_tx();
        let apdus = trusted_input_apdus(&raw(&tx), 1).unwrap();

        // first, input header, input tail, output count,
        // output 0 header + script, output 1 header + 2 script chunks, lock time
        assert_eq!(apdus.len(), 10);

        assert_eq!(apdus[0].p1, P1_FIRST);
        assert!(apdus[1..].iter().all(|a| a.p1 == P1_NEXT));
        assert!(apdus.iter().all(|a| a.ins == 0x42 && a.cla == 0xe0));
        assert!(apdus.iter().all(|a| a.data.len() <= MAX_APDU_DATA));

        assert_eq!(apdus[0].data, [0, 0, 0, 1, 1, 0, 0, 0, 1]);
        assert_eq!(apdus[1].data.len(), 32 + 4 + 1);
        assert_eq!(apdus[2].data.len(), 106 + 4);
        assert_eq!(apdus[3].data, [2]);
        assert_eq!(apdus[7].data.len(), 255);
        assert_eq!(apdus[8].data.len(), 300 - 255);
        assert_eq!(apdus[9].data, [0, 0, 0, 0]);

        // Reassembling the stream yields the original transaction
        let joined: Vec<u8> = apdus.iter().flat_map(|a| a.data.clone()).collect();
        assert_eq!(&joined[4..], &raw(&tx)[..]);
    }

    #[test]
    fn trusted_input_invalid_output() {
        let tx = example_tx();
        assert_eq!(
            trusted_input_apdus(&raw(&tx), 2),
            Err(ApduError::InvalidEncoding)
        );
        assert!(trusted_input_apdus(&[0x01, 0x00], 0).is_err());
    }

    #[test]
    fn trusted_input_resp() {
        encode_decode_apdu(&TrustedInput([0x32; 56]));

        assert_eq!(
            TrustedInput::decode_owned(&[0u8; 55]),
            Err(ApduError::InvalidLength)
        );
    }
}
