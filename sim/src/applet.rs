// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Emulated dongle applet
//!
//! Handles the dongle instruction set over encoded APDUs. Keys are derived
//! deterministically from the applet seed (not BIP32, callers only see
//! opaque keys), trusted inputs carry a truncated SHA256 MAC over the seed
//! so untrusted hash requests can check them.

use encdec::{DecodeOwned, Encode};
use k256::{
    ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
    elliptic_curve::sec1::ToEncodedPoint,
};
use log::{debug, warn};
use sha2::{Digest, Sha256};

use remote_dongle::{xpub::hash160, AttestationKeyProvider, CoinNetwork};
use remote_dongle_apdu::{
    ops::{
        attestation::{AttestationReq, AttestationResp},
        coin_version::CoinVersionReq,
        firmware::FirmwareVersion,
        pin::VerifyPinReq,
        public_key::{PublicKeyReq, PublicKeyResp},
        sign::{SignHashReq, SignatureResp, SIGHASH_ALL},
        trusted_input::TrustedInput,
        untrusted_hash::{FinalizeResp, P1_CHANGE_PATH, P1_LAST, TRUSTED_INPUT_MARKER},
        P1_FIRST, P1_NEXT,
    },
    read_varint,
    tx::Transaction,
    Apdu, ApduError, ApduResponse, Bip32Path, Instruction, StatusWord, DONGLE_APDU_CLA,
};

/// Default simulated PIN
pub const DEFAULT_PIN: &str = "1234";

/// PIN attempts before the applet locks
pub const PIN_ATTEMPTS: u8 = 3;

/// Status word for an unsupported class byte
const CLASS_NOT_SUPPORTED: StatusWord = StatusWord(0x6e00);

/// Status word for a technical fault
const TECHNICAL_PROBLEM: StatusWord = StatusWord(0x6f00);

/// Trusted input magic prefix
const TRUSTED_INPUT_MAGIC: [u8; 2] = [0x32, 0x00];

/// Transaction hashing state
#[derive(Debug)]
enum HashState {
    Idle,
    Started { hasher: Sha256, records: Vec<u8> },
    Outputs { hasher: Sha256 },
    Finalized { digest: [u8; 32] },
}

/// Emulated dongle applet
#[derive(Debug)]
pub struct SimApplet {
    seed: [u8; 32],
    pin: String,
    remaining_attempts: u8,
    verified: bool,

    attestation_key: SigningKey,
    batch_id: u32,
    derivation_id: u32,
    firmware: FirmwareVersion,

    /// Report DER signatures with a `0x31` tag, as some devices do
    pub der_quirk: bool,

    coin_version: CoinVersionReq,
    trusted_input: Option<(u32, Vec<u8>)>,
    hash: HashState,
}

impl Default for SimApplet {
    fn default() -> Self {
        Self::new([0x42; 32], DEFAULT_PIN)
    }
}

impl SimApplet {
    /// Create an applet with the provided key seed and PIN, and a random
    /// attestation key
    pub fn new(seed: [u8; 32], pin: &str) -> Self {
        Self {
            seed,
            pin: pin.to_string(),
            remaining_attempts: PIN_ATTEMPTS,
            verified: false,
            attestation_key: SigningKey::random(&mut rand::thread_rng()),
            batch_id: 1,
            derivation_id: 1,
            firmware: FirmwareVersion {
                features: 0x00,
                architecture: 0x00,
                major: 1,
                minor: 4,
                patch: 3,
                loader_major: 1,
                loader_minor: 2,
                setup: 0x00,
            },
            der_quirk: false,
            coin_version: CoinVersionReq::new(
                CoinNetwork::BITCOIN.p2pkh_prefix,
                CoinNetwork::BITCOIN.p2sh_prefix,
            ),
            trusted_input: None,
            hash: HashState::Idle,
        }
    }

    /// Replace the attestation signing key
    pub fn with_attestation_key(mut self, key: SigningKey, batch_id: u32, derivation_id: u32) -> Self {
        self.attestation_key = key;
        self.batch_id = batch_id;
        self.derivation_id = derivation_id;
        self
    }

    /// Key provider trusting this applet's attestation key as production key
    pub fn attestation_keys(&self) -> SimAttestationKeys {
        SimAttestationKeys {
            batch_id: self.batch_id,
            derivation_id: self.derivation_id,
            production: Some(self.attestation_public_key()),
            beta: SigningKey::random(&mut rand::thread_rng())
                .verifying_key()
                .to_sec1_bytes()
                .to_vec(),
        }
    }

    /// SEC1 encoded attestation public key
    pub fn attestation_public_key(&self) -> Vec<u8> {
        self.attestation_key.verifying_key().to_sec1_bytes().to_vec()
    }

    pub fn firmware(&self) -> FirmwareVersion {
        self.firmware
    }

    pub fn remaining_attempts(&self) -> u8 {
        self.remaining_attempts
    }

    pub fn coin_version(&self) -> (u8, u8) {
        (self.coin_version.p2pkh_prefix, self.coin_version.p2sh_prefix)
    }

    /// Derived public key (uncompressed SEC1) for a path
    pub fn public_key(&self, path: &Bip32Path) -> Option<Vec<u8>> {
        self.key_for(path).ok().map(|k| {
            k.verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec()
        })
    }

    /// Handle an encoded command APDU, returning the encoded response
    pub fn exchange(&mut self, apdu: &[u8]) -> Vec<u8> {
        let resp = match Apdu::parse(apdu) {
            Ok(a) => self.handle(&a),
            Err(e) => {
                warn!("Sim received invalid APDU: {e}");
                ApduResponse::new(vec![], StatusWord::INVALID_LENGTH)
            }
        };

        resp.to_bytes()
    }

    fn handle(&mut self, apdu: &Apdu) -> ApduResponse {
        if apdu.cla != DONGLE_APDU_CLA {
            return ApduResponse::new(vec![], CLASS_NOT_SUPPORTED);
        }

        let ins = match Instruction::try_from(apdu.ins) {
            Ok(i) => i,
            Err(_) => return ApduResponse::new(vec![], StatusWord::NOT_IMPLEMENTED),
        };

        debug!("Sim handling {ins} (p1: 0x{:02x})", apdu.p1);

        let r = match ins {
            Instruction::GetFirmwareVersion => encode(&self.firmware),
            Instruction::CheckAttestation => self.attestation(apdu),
            Instruction::VerifyPin => self.verify_pin(apdu),
            Instruction::SetCoinVersion => self.set_coin_version(apdu),
            ins => match self.verified {
                false => Err(StatusWord::INVALID_ACCESS_RIGHTS),
                true => match ins {
                    Instruction::GetPublicKey => self.get_public_key(apdu),
                    Instruction::GetTrustedInput => self.trusted_input(apdu),
                    Instruction::StartUntrustedHashTransactionInput => self.start_hash(apdu),
                    Instruction::FinalizeFullUntrustedHashTransactionInput => {
                        self.finalize_hash(apdu)
                    }
                    Instruction::SignUntrustedHash => self.sign(apdu),
                    _ => Err(StatusWord::NOT_IMPLEMENTED),
                },
            },
        };

        match r {
            Ok(data) => ApduResponse::ok(data),
            Err(sw) => {
                debug!("Sim {ins} failed with {sw}");
                ApduResponse::new(vec![], sw)
            }
        }
    }

    fn attestation(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        let (req, _) = AttestationReq::decode_owned(&apdu.data).map_err(invalid)?;

        let mut resp = AttestationResp {
            batch_id: self.batch_id,
            derivation_id: self.derivation_id,
            version: encode(&self.firmware)?
                .try_into()
                .map_err(|_| TECHNICAL_PROBLEM)?,
            signature: vec![],
        };

        let digest = Sha256::digest(resp.signed_data(&req.nonce));
        resp.signature = self.sign_digest(&self.attestation_key, &digest)?;

        encode(&resp)
    }

    fn verify_pin(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        let (req, _) = VerifyPinReq::decode_owned(&apdu.data).map_err(invalid)?;

        if self.remaining_attempts == 0 {
            return Err(StatusWord::INVALID_ACCESS_RIGHTS);
        }

        match req.pin {
            // State query
            None if self.verified => Ok(vec![0x01]),
            None => Err(StatusWord::wrong_pin(self.remaining_attempts)),
            Some(p) if p == self.pin => {
                self.verified = true;
                self.remaining_attempts = PIN_ATTEMPTS;
                Ok(vec![0x01])
            }
            Some(_) => {
                self.verified = false;
                self.remaining_attempts -= 1;
                Err(StatusWord::wrong_pin(self.remaining_attempts))
            }
        }
    }

    fn set_coin_version(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        let (req, _) = CoinVersionReq::decode_owned(&apdu.data).map_err(invalid)?;
        self.coin_version = req;
        Ok(vec![])
    }

    fn get_public_key(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        let (req, _) = PublicKeyReq::decode_owned(&apdu.data).map_err(invalid)?;

        let key = self.key_for(&req.path)?;
        let public_key = key.verifying_key().to_encoded_point(false).as_bytes().to_vec();
        let compressed = key.verifying_key().to_encoded_point(true);

        let mut address = vec![self.coin_version.p2pkh_prefix];
        address.extend_from_slice(&hash160(compressed.as_bytes()));

        let resp = PublicKeyResp {
            public_key,
            address: bs58::encode(address).with_check().into_string(),
            chain_code: self.derive(b"chain", &req.path)?,
        };

        encode(&resp)
    }

    fn trusted_input(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        match apdu.p1 {
            P1_FIRST => {
                if apdu.data.len() < 4 {
                    return Err(StatusWord::INVALID_LENGTH);
                }
                let index = u32::from_be_bytes([apdu.data[0], apdu.data[1], apdu.data[2], apdu.data[3]]);
                self.trusted_input = Some((index, apdu.data[4..].to_vec()));
            }
            P1_NEXT => match &mut self.trusted_input {
                Some((_, b)) => b.extend_from_slice(&apdu.data),
                None => return Err(StatusWord::INVALID_REQUEST),
            },
            _ => return Err(StatusWord::INVALID_PARAMETERS),
        }

        // Respond once the full transaction has been streamed
        let (index, raw) = match &self.trusted_input {
            Some(t) => t,
            None => return Err(StatusWord::INVALID_REQUEST),
        };
        let tx = match Transaction::parse(raw) {
            Ok(tx) => tx,
            Err(_) => return Ok(vec![]),
        };

        let output = tx
            .outputs
            .get(*index as usize)
            .ok_or(StatusWord::INVALID_REQUEST)?;

        let mut ti = [0u8; TrustedInput::LEN];
        ti[..2].copy_from_slice(&TRUSTED_INPUT_MAGIC);
        ti[2..4].copy_from_slice(&rand::random::<[u8; 2]>());
        ti[4..36].copy_from_slice(&Sha256::digest(Sha256::digest(raw)));
        ti[36..40].copy_from_slice(&index.to_le_bytes());
        ti[40..48].copy_from_slice(&output.amount.to_le_bytes());
        let mac = self.mac(&ti[..48]);
        ti[48..].copy_from_slice(&mac);

        self.trusted_input = None;

        Ok(ti.to_vec())
    }

    fn start_hash(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        match apdu.p1 {
            P1_FIRST => {
                let mut hasher = Sha256::new();
                hasher.update(&apdu.data);
                self.hash = HashState::Started {
                    hasher,
                    records: vec![],
                };
            }
            P1_NEXT => match &mut self.hash {
                HashState::Started { hasher, records } => {
                    hasher.update(&apdu.data);
                    records.extend_from_slice(&apdu.data);
                }
                _ => return Err(StatusWord::INVALID_REQUEST),
            },
            _ => return Err(StatusWord::INVALID_PARAMETERS),
        }

        Ok(vec![])
    }

    fn finalize_hash(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        let state = std::mem::replace(&mut self.hash, HashState::Idle);

        let mut hasher = match (apdu.p1, state) {
            (P1_CHANGE_PATH, HashState::Started { hasher, records }) => {
                self.check_records(&records)?;
                hasher
            }
            (P1_FIRST | P1_LAST, HashState::Outputs { hasher }) => hasher,
            (P1_CHANGE_PATH | P1_FIRST | P1_LAST, _) => return Err(StatusWord::INVALID_REQUEST),
            _ => return Err(StatusWord::INVALID_PARAMETERS),
        };

        hasher.update(&apdu.data);

        match apdu.p1 {
            P1_LAST => {
                let digest = Sha256::digest(hasher.finalize());
                self.hash = HashState::Finalized {
                    digest: digest.into(),
                };
                encode(&FinalizeResp::default())
            }
            _ => {
                self.hash = HashState::Outputs { hasher };
                Ok(vec![])
            }
        }
    }

    fn sign(&mut self, apdu: &Apdu) -> Result<Vec<u8>, StatusWord> {
        let (req, _) = SignHashReq::decode_owned(&apdu.data).map_err(invalid)?;
        if req.sighash != SIGHASH_ALL {
            return Err(StatusWord::INVALID_PARAMETERS);
        }

        let digest = match std::mem::replace(&mut self.hash, HashState::Idle) {
            HashState::Finalized { digest } => digest,
            _ => return Err(StatusWord::INVALID_REQUEST),
        };

        let key = self.key_for(&req.path)?;
        let signature = self.sign_digest(&key, &digest)?;

        encode(&SignatureResp {
            signature,
            sighash: req.sighash,
        })
    }

    /// Check trusted input records streamed by a start request
    fn check_records(&self, mut records: &[u8]) -> Result<(), StatusWord> {
        while !records.is_empty() {
            if records.len() < 2 + TrustedInput::LEN
                || records[0] != TRUSTED_INPUT_MARKER
                || records[1] as usize != TrustedInput::LEN
            {
                return Err(StatusWord::INVALID_REQUEST);
            }

            let ti = &records[2..][..TrustedInput::LEN];
            if ti[..2] != TRUSTED_INPUT_MAGIC || ti[48..] != self.mac(&ti[..48]) {
                warn!("Sim rejecting untrusted input");
                return Err(StatusWord::INVALID_REQUEST);
            }
            records = &records[2 + TrustedInput::LEN..];

            let (script_len, n) = read_varint(records).map_err(invalid)?;
            records = usize::try_from(script_len)
                .ok()
                .and_then(|l| l.checked_add(n + 4))
                .and_then(|skip| records.get(skip..))
                .ok_or(StatusWord::INVALID_LENGTH)?;
        }

        Ok(())
    }

    fn mac(&self, data: &[u8]) -> [u8; 8] {
        let h = Sha256::new()
            .chain_update(self.seed)
            .chain_update(data)
            .finalize();

        let mut m = [0u8; 8];
        m.copy_from_slice(&h[..8]);
        m
    }

    fn derive(&self, label: &[u8], path: &Bip32Path) -> Result<[u8; 32], StatusWord> {
        let p = encode(path)?;

        Ok(Sha256::new()
            .chain_update(label)
            .chain_update(self.seed)
            .chain_update(p)
            .finalize()
            .into())
    }

    fn key_for(&self, path: &Bip32Path) -> Result<SigningKey, StatusWord> {
        let k = self.derive(b"key", path)?;
        SigningKey::from_slice(&k).map_err(|_| TECHNICAL_PROBLEM)
    }

    fn sign_digest(&self, key: &SigningKey, digest: &[u8]) -> Result<Vec<u8>, StatusWord> {
        let sig: Signature = key.sign_prehash(digest).map_err(|_| TECHNICAL_PROBLEM)?;

        let mut der = sig.to_der().as_bytes().to_vec();
        if self.der_quirk {
            der[0] = 0x31;
        }

        Ok(der)
    }
}

fn invalid(_e: ApduError) -> StatusWord {
    StatusWord::INVALID_LENGTH
}

fn encode<E: Encode<Error = ApduError>>(v: &E) -> Result<Vec<u8>, StatusWord> {
    let mut b = vec![0u8; v.encode_len().map_err(invalid)?];
    let n = v.encode(&mut b).map_err(invalid)?;
    b.truncate(n);
    Ok(b)
}

/// Attestation keys for a simulated applet
#[derive(Clone, Debug, PartialEq)]
pub struct SimAttestationKeys {
    pub batch_id: u32,
    pub derivation_id: u32,
    pub production: Option<Vec<u8>>,
    pub beta: Vec<u8>,
}

impl AttestationKeyProvider for SimAttestationKeys {
    fn production_key(&self, batch_id: u32, derivation_id: u32) -> Option<Vec<u8>> {
        match (batch_id, derivation_id) {
            (b, d) if b == self.batch_id && d == self.derivation_id => self.production.clone(),
            _ => None,
        }
    }

    fn beta_key(&self) -> Vec<u8> {
        self.beta.clone()
    }
}

#[cfg(test)]
mod test {
    use remote_dongle_apdu::{ops::pin::VerifyPinReq, ApduStatic, Status};

    use super::*;

    fn exchange<R>(a: &mut SimApplet, req: &R) -> ApduResponse
    where
        R: ApduStatic + Encode<Error = ApduError>,
    {
        let apdu = Apdu::from_req(req).unwrap();
        ApduResponse::parse(&a.exchange(&apdu.to_bytes())).unwrap()
    }

    #[test]
    fn pin_attempts() {
        let mut a = SimApplet::default();

        let r = exchange(&mut a, &VerifyPinReq::new(None));
        assert_eq!(r.status(), Status::WrongPin { remaining: 3 });

        let r = exchange(&mut a, &VerifyPinReq::new(Some("0000")));
        assert_eq!(r.status(), Status::WrongPin { remaining: 2 });

        let r = exchange(&mut a, &VerifyPinReq::new(Some(DEFAULT_PIN)));
        assert_eq!(r.status(), Status::Success);
        assert!(!r.data.is_empty());
        assert_eq!(a.remaining_attempts(), PIN_ATTEMPTS);

        for remaining in (0..PIN_ATTEMPTS).rev() {
            let r = exchange(&mut a, &VerifyPinReq::new(Some("0000")));
            assert_eq!(r.status(), Status::WrongPin { remaining });
        }

        // Locked
        let r = exchange(&mut a, &VerifyPinReq::new(Some(DEFAULT_PIN)));
        assert_eq!(r.status(), Status::InvalidAccessRights);
    }

    #[test]
    fn public_key_requires_pin() {
        let mut a = SimApplet::default();
        let path: Bip32Path = "m/44'/0'/0'".parse().unwrap();

        let r = exchange(&mut a, &PublicKeyReq::new(path.clone()));
        assert_eq!(r.status(), Status::InvalidAccessRights);

        exchange(&mut a, &VerifyPinReq::new(Some(DEFAULT_PIN)));

        let r = exchange(&mut a, &PublicKeyReq::new(path.clone()));
        let (k, _) = PublicKeyResp::decode_owned(&r.data).unwrap();

        assert_eq!(Some(k.public_key), a.public_key(&path));
        assert!(k.address.starts_with('1'));
    }

    #[test]
    fn oversized_record_script() {
        let a = SimApplet::default();

        let mut ti = [0u8; TrustedInput::LEN];
        ti[..2].copy_from_slice(&TRUSTED_INPUT_MAGIC);
        let mac = a.mac(&ti[..48]);
        ti[48..].copy_from_slice(&mac);

        let mut records = vec![TRUSTED_INPUT_MARKER, TrustedInput::LEN as u8];
        records.extend_from_slice(&ti);

        let mut valid = records.clone();
        valid.extend_from_slice(&[0x01, 0x00, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(a.check_records(&valid), Ok(()));

        records.push(0xff);
        records.extend_from_slice(&u64::MAX.to_le_bytes());
        assert_eq!(
            a.check_records(&records),
            Err(StatusWord::INVALID_LENGTH)
        );
    }

    #[test]
    fn unknown_instruction() {
        let mut a = SimApplet::default();

        let r = ApduResponse::parse(&a.exchange(&[0xe0, 0x99, 0x00, 0x00, 0x00])).unwrap();
        assert_eq!(r.status(), Status::NotImplemented);

        let r = ApduResponse::parse(&a.exchange(&[0xb0, 0xc4, 0x00, 0x00, 0x00])).unwrap();
        assert_eq!(r.status(), Status::Unknown(0x6e00));
    }
}
