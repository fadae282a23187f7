// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bitcoin (non-segwit) transaction wire format
//!
//! Used to split previous transactions on field boundaries when streaming them
//! to the device, and by the simulator to detect the end of a streamed transaction.

use byteorder::{ByteOrder, LittleEndian};
use encdec::{DecodeOwned, Encode};

use crate::{read_varint, varint_len, write_varint, ApduError};

/// Transaction input
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxInput {
    /// Previous transaction hash (wire order)
    pub prev_hash: [u8; 32],
    /// Previous output index
    pub prev_index: u32,
    /// Signature script
    pub script: Vec<u8>,
    pub sequence: u32,
}

/// Transaction output
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxOutput {
    /// Amount in satoshis
    pub amount: u64,
    /// Locking script
    pub script: Vec<u8>,
}

/// Transaction
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl TxInput {
    /// Encode the input header (hash, index, script length)
    pub fn header(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(45);
        b.extend_from_slice(&self.prev_hash);
        b.extend_from_slice(&self.prev_index.to_le_bytes());
        write_varint(&mut b, self.script.len() as u64);
        b
    }

    /// Encode the input tail (script, sequence)
    pub fn tail(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.script.len() + 4);
        b.extend_from_slice(&self.script);
        b.extend_from_slice(&self.sequence.to_le_bytes());
        b
    }
}

impl TxOutput {
    pub fn new(amount: u64, script: Vec<u8>) -> Self {
        Self { amount, script }
    }

    /// Encode the output header (amount, script length)
    pub fn header(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(17);
        b.extend_from_slice(&self.amount.to_le_bytes());
        write_varint(&mut b, self.script.len() as u64);
        b
    }
}

/// Bounds-checked little-endian reader over a transaction buffer
struct Reader<'a> {
    buff: &'a [u8],
    index: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ApduError> {
        let b = self
            .buff
            .get(self.index..)
            .and_then(|b| b.get(..n))
            .ok_or(ApduError::InvalidLength)?;
        self.index += n;
        Ok(b)
    }

    fn u32(&mut self) -> Result<u32, ApduError> {
        self.take(4).map(LittleEndian::read_u32)
    }

    fn u64(&mut self) -> Result<u64, ApduError> {
        self.take(8).map(LittleEndian::read_u64)
    }

    fn varint(&mut self) -> Result<u64, ApduError> {
        let (v, n) = read_varint(&self.buff[self.index.min(self.buff.len())..])?;
        self.index += n;
        Ok(v)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, ApduError> {
        let n = usize::try_from(self.varint()?).map_err(|_| ApduError::InvalidLength)?;
        self.take(n).map(|b| b.to_vec())
    }
}

impl DecodeOwned for Transaction {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let mut r = Reader { buff, index: 0 };

        let version = r.u32()?;

        // Segwit marker (0x00 input count) is not supported
        let input_count = r.varint()?;
        if input_count == 0 {
            return Err(ApduError::InvalidEncoding);
        }

        let mut inputs = vec![];
        for _ in 0..input_count {
            let mut prev_hash = [0u8; 32];
            prev_hash.copy_from_slice(r.take(32)?);

            inputs.push(TxInput {
                prev_hash,
                prev_index: r.u32()?,
                script: r.bytes()?,
                sequence: r.u32()?,
            });
        }

        let output_count = r.varint()?;
        let mut outputs = vec![];
        for _ in 0..output_count {
            outputs.push(TxOutput {
                amount: r.u64()?,
                script: r.bytes()?,
            });
        }

        let lock_time = r.u32()?;

        Ok((
            Self {
                version,
                inputs,
                outputs,
                lock_time,
            },
            r.index,
        ))
    }
}

impl Encode for Transaction {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let mut n = 4 + varint_len(self.inputs.len() as u64);
        for i in &self.inputs {
            n += 32 + 4 + varint_len(i.script.len() as u64) + i.script.len() + 4;
        }
        n += varint_len(self.outputs.len() as u64);
        for o in &self.outputs {
            n += 8 + varint_len(o.script.len() as u64) + o.script.len();
        }
        Ok(n + 4)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        let mut b = Vec::with_capacity(n);
        b.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut b, self.inputs.len() as u64);
        for i in &self.inputs {
            b.extend_from_slice(&i.header());
            b.extend_from_slice(&i.tail());
        }
        write_varint(&mut b, self.outputs.len() as u64);
        for o in &self.outputs {
            b.extend_from_slice(&o.header());
            b.extend_from_slice(&o.script);
        }
        b.extend_from_slice(&self.lock_time.to_le_bytes());

        buff[..n].copy_from_slice(&b);
        Ok(n)
    }
}

impl Transaction {
    /// Parse a complete raw transaction, rejecting trailing bytes
    pub fn parse(raw: &[u8]) -> Result<Self, ApduError> {
        let (tx, n) = Self::decode_owned(raw)?;
        if n != raw.len() {
            return Err(ApduError::InvalidEncoding);
        }
        Ok(tx)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Simple one-input, two-output transaction used across tests
    pub fn example_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev_hash: [0x11; 32],
                prev_index: 1,
                script: vec![0xab; 106],
                sequence: 0xffff_ffff,
            }],
            outputs: vec![
                TxOutput::new(50_000, vec![0x76, 0xa9, 0x14]),
                TxOutput::new(1_000, vec![0xcd; 300]),
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn transaction_encoding() {
        let tx = example_tx();

        let mut buff = vec![0u8; tx.encode_len().unwrap()];
        tx.encode(&mut buff).unwrap();

        assert_eq!(&buff[..4], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(buff[4], 0x01);
        assert_eq!(Transaction::parse(&buff), Ok(tx));
    }

    #[test]
    fn truncated_transaction() {
        let tx = example_tx();

        let mut buff = vec![0u8; tx.encode_len().unwrap()];
        tx.encode(&mut buff).unwrap();

        assert_eq!(
            Transaction::parse(&buff[..buff.len() - 1]),
            Err(ApduError::InvalidLength)
        );

        buff.push(0x00);
        assert_eq!(Transaction::parse(&buff), Err(ApduError::InvalidEncoding));
    }

    #[test]
    fn oversized_script_length() {
        let mut buff = vec![0x01, 0x00, 0x00, 0x00, 0x01];
        buff.extend_from_slice(&[0u8; 36]);
        buff.push(0xff);
        buff.extend_from_slice(&u64::MAX.to_le_bytes());

        assert_eq!(Transaction::parse(&buff), Err(ApduError::InvalidLength));

        // Output script length exceeding the remaining data
        let tx = example_tx();
        let mut buff = vec![0u8; tx.encode_len().unwrap()];
        tx.encode(&mut buff).unwrap();

        let script_len = buff.len() - 4 - 300 - 3;
        assert_eq!(&buff[script_len..][..3], &[0xfd, 0x2c, 0x01]);
        buff[script_len] = 0xfe;
        buff[script_len + 1..][..2].copy_from_slice(&[0xff, 0xff]);

        assert!(Transaction::parse(&buff).is_err());
    }
}
