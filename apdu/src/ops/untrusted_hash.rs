// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Untrusted hash APDUs, streaming the transaction being signed
//!
//! ## Start (`INS = 0x44`)
//!
//! ```text
//! APDU 0 (P1 0x00): VERSION (LE u32 = 1) ‖ INPUT_COUNT (varint)
//! per input (P1 0x80):
//!   0x01 ‖ LEN ‖ TRUSTED_INPUT ‖ SCRIPT_LEN (varint) ‖ SCRIPT ‖ SEQUENCE (0xFFFFFFFF)
//! ```
//!
//! Only the input being signed carries the spending script, every other
//! input is sent with an empty script.
//!
//! ## Finalize full (`INS = 0x4A`)
//!
//! ```text
//! APDU 0 (P1 0xFF): change path (DEPTH ‖ BE INDEXES), or 0x00 without change
//! APDU 1 (P1 0x00): OUTPUT_COUNT (varint)
//! per output:       AMOUNT (LE u64) ‖ SCRIPT_LEN (varint), then SCRIPT chunks
//! ```
//!
//! The final script chunk of the final output is sent with `P1 = 0x80`, its
//! response carries a two byte flag which must be `0x00 0x00`.

use encdec::{DecodeOwned, Encode};

use super::{chunks, P1_FIRST, P1_NEXT};
use crate::{
    tx::TxOutput, write_varint, Apdu, ApduError, Bip32Path, Instruction, DONGLE_APDU_CLA,
};

use super::trusted_input::TrustedInput;

/// Transaction version sent in the untrusted hash header
pub const UNTRUSTED_HASH_TX_VERSION: u32 = 1;

/// Input sequence used for every streamed input
pub const INPUT_SEQUENCE: u32 = 0xffff_ffff;

/// Trusted input record marker
pub const TRUSTED_INPUT_MARKER: u8 = 0x01;

/// P1 for the change path APDU of finalize full
pub const P1_CHANGE_PATH: u8 = 0xff;

/// P1 for the final finalize full APDU
pub const P1_LAST: u8 = 0x80;

const START_INS: u8 = Instruction::StartUntrustedHashTransactionInput as u8;
const FINALIZE_INS: u8 = Instruction::FinalizeFullUntrustedHashTransactionInput as u8;

/// Build the start untrusted hash APDU stream
pub fn start_untrusted_hash_apdus(
    trusted_inputs: &[TrustedInput],
    trusted_input_index: usize,
    output_script: &[u8],
) -> Result<Vec<Apdu>, ApduError> {
    if trusted_inputs.is_empty() || trusted_input_index >= trusted_inputs.len() {
        return Err(ApduError::InvalidEncoding);
    }

    // Header
    let mut header = UNTRUSTED_HASH_TX_VERSION.to_le_bytes().to_vec();
    write_varint(&mut header, trusted_inputs.len() as u64);

    let mut apdus = vec![Apdu::new(
        DONGLE_APDU_CLA,
        START_INS,
        P1_FIRST,
        0x00,
        header,
    )?];

    // Trusted input records
    for (i, ti) in trusted_inputs.iter().enumerate() {
        let mut record = vec![TRUSTED_INPUT_MARKER, TrustedInput::LEN as u8];
        record.extend_from_slice(ti.as_ref());

        match i == trusted_input_index {
            true => {
                write_varint(&mut record, output_script.len() as u64);
                record.extend_from_slice(output_script);
            }
            false => write_varint(&mut record, 0),
        }
        record.extend_from_slice(&INPUT_SEQUENCE.to_le_bytes());

        for c in chunks(&record) {
            apdus.push(Apdu::new(
                DONGLE_APDU_CLA,
                START_INS,
                P1_NEXT,
                0x00,
                c.to_vec(),
            )?);
        }
    }

    Ok(apdus)
}

/// Build the finalize full APDU stream
pub fn finalize_full_apdus(
    outputs: &[TxOutput],
    change_path: Option<&Bip32Path>,
) -> Result<Vec<Apdu>, ApduError> {
    if outputs.is_empty() || outputs.iter().any(|o| o.script.is_empty()) {
        return Err(ApduError::InvalidEncoding);
    }

    // Change path
    let change = match change_path {
        Some(p) => {
            let mut b = vec![0u8; p.encode_len()?];
            p.encode(&mut b)?;
            b
        }
        None => vec![0x00],
    };

    let mut apdus = vec![Apdu::new(
        DONGLE_APDU_CLA,
        FINALIZE_INS,
        P1_CHANGE_PATH,
        0x00,
        change,
    )?];

    // Output count
    let mut count = vec![];
    write_varint(&mut count, outputs.len() as u64);
    apdus.push(Apdu::new(DONGLE_APDU_CLA, FINALIZE_INS, P1_FIRST, 0x00, count)?);

    // Outputs
    for (i, o) in outputs.iter().enumerate() {
        apdus.push(Apdu::new(
            DONGLE_APDU_CLA,
            FINALIZE_INS,
            P1_FIRST,
            0x00,
            o.header(),
        )?);

        let n = chunks(&o.script).count();
        for (j, c) in chunks(&o.script).enumerate() {
            let last = i == outputs.len() - 1 && j == n - 1;
            let p1 = if last { P1_LAST } else { P1_FIRST };

            apdus.push(Apdu::new(
                DONGLE_APDU_CLA,
                FINALIZE_INS,
                p1,
                0x00,
                c.to_vec(),
            )?);
        }
    }

    Ok(apdus)
}

/// Finalize full response flags
///
/// ```text
/// +---------------+-----------------+
/// |      RFU      | USER_VALIDATION |
/// +---------------+-----------------+
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct FinalizeResp {
    pub rfu: u8,
    pub user_validation: u8,
}

impl FinalizeResp {
    /// Check the device reported success (both flag bytes zero)
    pub fn is_ok(&self) -> bool {
        self.rfu == 0x00 && self.user_validation == 0x00
    }
}

impl Encode for FinalizeResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(2)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }
        buff[0] = self.rfu;
        buff[1] = self.user_validation;
        Ok(2)
    }
}

impl DecodeOwned for FinalizeResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }
        Ok((
            Self {
                rfu: buff[0],
                user_validation: buff[1],
            },
            2,
        ))
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use crate::test::encode_decode_apdu;

    #[test]
    fn start_untrusted_hash_stream() {
        let inputs = vec![TrustedInput([0x01; 56]), TrustedInput([0x02; 56])];
        let script = [0x76, 0xa9, 0x14];

        let apdus = start_untrusted_hash_apdus(&inputs, 1, &script).unwrap();
        assert_eq!(apdus.len(), 3);

        // Header
        assert_eq!(apdus[0].p1, P1_FIRST);
        assert_eq!(apdus[0].data, [0x01, 0x00, 0x00, 0x00, 0x02]);

        // Input without script
        assert_eq!(apdus[1].p1, P1_NEXT);
        assert_eq!(&apdus[1].data[..2], &[0x01, 56]);
        assert_eq!(&apdus[1].data[58..], &[0x00, 0xff, 0xff, 0xff, 0xff]);

        // Input under signature carries the script
        assert_eq!(&apdus[2].data[58..], &[0x03, 0x76, 0xa9, 0x14, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn start_untrusted_hash_requires_inputs() {
        assert!(start_untrusted_hash_apdus(&[], 0, &[0x51]).is_err());
        assert!(start_untrusted_hash_apdus(&[TrustedInput([0; 56])], 1, &[0x51]).is_err());
    }

    #[test]
    fn finalize_full_stream() {
        let outputs = vec![
            TxOutput::new(10_000, vec![0xaa; 25]),
            TxOutput::new(20_000, vec![0xbb; 300]),
        ];
        let change = Bip32Path::from_str("m/44'/0'/0'/1/0").unwrap();

        let apdus = finalize_full_apdus(&outputs, Some(&change)).unwrap();

        // change, count, header, script, header, 2 script chunks
        assert_eq!(apdus.len(), 7);

        assert_eq!(apdus[0].p1, P1_CHANGE_PATH);
        assert_eq!(apdus[0].data[0], 5);
        assert_eq!(apdus[1].data, [2]);
        assert_eq!(&apdus[2].data[..8], &10_000u64.to_le_bytes());
        assert_eq!(apdus[2].data[8], 25);

        // Only the final chunk is marked
        let marked: Vec<_> = apdus.iter().map(|a| a.p1 == P1_LAST).collect();
        assert_eq!(marked, [false, false, false, false, false, false, true]);
        assert_eq!(apdus[6].data.len(), 300 - 255);
    }

    #[test]
    fn finalize_full_without_change() {
        let outputs = vec![TxOutput::new(1, vec![0x51])];
        let apdus = finalize_full_apdus(&outputs, None).unwrap();

        assert_eq!(apdus[0].data, [0x00]);
        assert_eq!(apdus.last().map(|a| a.p1), Some(P1_LAST));

        assert!(finalize_full_apdus(&[], None).is_err());
    }

    #[test]
    fn finalize_resp() {
        encode_decode_apdu(&FinalizeResp::default());

        assert!(FinalizeResp::decode_owned(&[0x00, 0x00]).unwrap().0.is_ok());
        assert!(!FinalizeResp::decode_owned(&[0x00, 0x01]).unwrap().0.is_ok());
    }
}
