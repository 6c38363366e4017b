use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::{self, FromStr};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::model::{Fine, FineReport, Plate, PlateError, Transit, timestamp};

const CODE_START: u8 = b'<';
const CODE_END: u8 = b'>';
const CODE_SEPARATOR: char = '|';
const MAX_CODE_LEN: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error(transparent)]
    Plate(#[from] PlateError),
    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("data_out must not precede data_in")]
    ExitBeforeEntry,
    #[error("dataOut must not precede dataIn")]
    WindowReversed,
}

/// Body of a direct (operator or smart gate) transit submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitRequest {
    #[serde(rename = "targa")]
    pub plate: Plate,
    #[serde(rename = "tratta")]
    pub route_id: i64,
    #[serde(rename = "data_in", deserialize_with = "timestamp::deserialize")]
    pub entry_at: DateTime<Utc>,
    #[serde(rename = "data_out", deserialize_with = "timestamp::deserialize")]
    pub exit_at: DateTime<Utc>,
}

impl TransitRequest {
    pub fn check(&self) -> Result<(), RequestError> {
        if self.exit_at < self.entry_at {
            return Err(RequestError::ExitBeforeEntry);
        }
        Ok(())
    }
}

/// Response to a transit submission. `multa` is absent when no fine was issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitCreated {
    #[serde(rename = "transito")]
    pub transit: Transit,
    #[serde(rename = "multa", default, skip_serializing_if = "Option::is_none")]
    pub fine: Option<Fine>,
}

/// Plates and time window for a fine listing.
#[derive(Debug, Clone, PartialEq)]
pub struct FineQuery {
    pub plates: Vec<Plate>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl FineQuery {
    /// Builds a query from decoded query-string pairs. `targa` may repeat and
    /// may also carry a comma separated list.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, RequestError> {
        let mut plates = vec![];
        let mut from = None;
        let mut to = None;

        for (key, value) in pairs {
            match key.as_str() {
                "targa" => {
                    for plate in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                        let plate: Plate = plate.parse()?;
                        if !plates.contains(&plate) {
                            plates.push(plate);
                        }
                    }
                }
                "dataIn" => {
                    from = Some(
                        timestamp::parse(value)
                            .ok_or_else(|| RequestError::InvalidTimestamp(value.clone()))?,
                    )
                }
                "dataOut" => {
                    to = Some(
                        timestamp::parse(value)
                            .ok_or_else(|| RequestError::InvalidTimestamp(value.clone()))?,
                    )
                }
                other => debug!("Ignoring query parameter {}", other),
            }
        }

        if plates.is_empty() {
            return Err(RequestError::MissingParameter("targa"));
        }
        let from = from.ok_or(RequestError::MissingParameter("dataIn"))?;
        let to = to.ok_or(RequestError::MissingParameter("dataOut"))?;
        if to < from {
            return Err(RequestError::WindowReversed);
        }

        Ok(FineQuery { plates, from, to })
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .plates
            .iter()
            .map(|p| (String::from("targa"), p.to_string()))
            .collect();
        pairs.push((String::from("dataIn"), self.from.to_rfc3339()));
        pairs.push((String::from("dataOut"), self.to.to_rfc3339()));
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidId,
    InvalidToken,
    TokenExpiredError,
    InternalServerError,
}

impl ErrorCode {
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::BadRequest | ErrorCode::InvalidId => 400,
            ErrorCode::Unauthorized | ErrorCode::InvalidToken | ErrorCode::TokenExpiredError => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::InternalServerError => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub code: ErrorCode,
    pub message: String,
}

/// `{ "error": { "statusCode", "code", "message" } }`, returned by every
/// endpoint on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ErrorEnvelope {
            error: ErrorBody {
                status_code: code.status(),
                code,
                message: message.into(),
            },
        }
    }
}

/// Scannable payment code printed on a payment document:
/// `<paymentId|fineId|plate|amount>`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCode {
    pub payment_id: String,
    pub fine_id: i64,
    pub plate: Plate,
    pub amount: f64,
}

impl From<&FineReport> for PaymentCode {
    fn from(report: &FineReport) -> Self {
        PaymentCode {
            payment_id: report.payment_id.clone(),
            fine_id: report.id,
            plate: report.transit.plate.clone(),
            amount: report.amount,
        }
    }
}

impl fmt::Display for PaymentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}|{}|{}|{}>",
            self.payment_id, self.fine_id, self.plate, self.amount
        )
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PaymentCodeError {
    #[error("payment code must be enclosed in angle brackets")]
    Unframed,
    #[error("payment code must have 4 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid fine id '{0}'")]
    FineId(String),
    #[error("invalid amount '{0}'")]
    Amount(String),
    #[error("empty payment id")]
    PaymentId,
    #[error(transparent)]
    Plate(#[from] PlateError),
}

impl PaymentCode {
    fn parse_fields(inner: &str) -> Result<Self, PaymentCodeError> {
        let fields: Vec<&str> = inner.split(CODE_SEPARATOR).collect();
        if fields.len() != 4 {
            return Err(PaymentCodeError::FieldCount(fields.len()));
        }
        if fields[0].is_empty() {
            return Err(PaymentCodeError::PaymentId);
        }
        let fine_id = fields[1]
            .parse()
            .map_err(|_| PaymentCodeError::FineId(fields[1].to_string()))?;
        let plate = fields[2].parse()?;
        let amount = fields[3]
            .parse()
            .map_err(|_| PaymentCodeError::Amount(fields[3].to_string()))?;

        Ok(PaymentCode {
            payment_id: fields[0].to_string(),
            fine_id,
            plate,
            amount,
        })
    }
}

impl FromStr for PaymentCode {
    type Err = PaymentCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .ok_or(PaymentCodeError::Unframed)?;
        Self::parse_fields(inner)
    }
}

/// Splits a byte stream from a code scanner into payment codes. Bytes outside
/// `<...>` frames are skipped.
pub struct PaymentCodeDecoder {}

impl Decoder for PaymentCodeDecoder {
    type Item = PaymentCode;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = match src.iter().position(|b| *b == CODE_START) {
            Some(start) => start,
            None => {
                src.clear();
                return Ok(None);
            }
        };
        src.advance(start);

        let end = match src.iter().position(|b| *b == CODE_END) {
            Some(end) => end,
            None if src.len() > MAX_CODE_LEN => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "payment code exceeds maximum length",
                ));
            }
            None => return Ok(None),
        };

        // A later '<' before the close starts the real frame.
        let restart = src[..end]
            .iter()
            .rposition(|b| *b == CODE_START)
            .unwrap_or(0);
        src.advance(restart);
        let end = end - restart;

        let frame = src.split_to(end + 1);
        debug!("code frame: {:?}", frame);
        let inner = match str::from_utf8(&frame[1..end]) {
            Ok(s) => s,
            Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        };

        match PaymentCode::parse_fields(inner) {
            Ok(code) => Ok(Some(code)),
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }
}

pub struct PaymentCodeEncoder {}

impl Encoder<PaymentCode> for PaymentCodeEncoder {
    type Error = std::io::Error;

    fn encode(&mut self, item: PaymentCode, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let code = item.to_string();
        dst.reserve(code.len());
        dst.put_slice(code.as_bytes());
        Ok(())
    }
}
