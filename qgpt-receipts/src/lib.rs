//! Append-only, hash-chained record of pipeline runs.
//!
//! One JSON object per line. Each receipt's `chain_hash` covers its own fields
//! and the previous receipt's hash, so editing or dropping a line breaks
//! verification from that point on.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use qgpt_types::PipelineResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("hash chain broken on line {line}: {message}")]
    Chain { line: usize, message: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReceipt {
    pub receipt_id: Uuid,
    pub timestamp: String,
    pub question_hash: String,
    pub sql_hash: String,
    pub workspaces: Vec<String>,
    pub tables: Vec<String>,
    /// Validity of the SQL as first generated.
    pub valid: bool,
    pub repaired: bool,
    pub prev_hash: Option<String>,
    pub chain_hash: String,
}

impl RunReceipt {
    /// Unchained receipt for a finished run; `append` fills in the hashes.
    pub fn for_result(result: &PipelineResult) -> Self {
        Self {
            receipt_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            question_hash: sha256_hex(&result.question),
            sql_hash: sha256_hex(&result.generated_sql),
            workspaces: result.selected_workspaces.clone(),
            tables: result.confirmed_tables.clone(),
            valid: result.validation.valid,
            repaired: result.repaired,
            prev_hash: None,
            chain_hash: String::new(),
        }
    }
}

pub struct ReceiptLog {
    path: PathBuf,
    last_hash: Mutex<Option<String>>,
}

impl ReceiptLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReceiptError> {
        let path = path.as_ref().to_path_buf();
        let last_hash = read_all(&path)?.pop().map(|r| r.chain_hash);
        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Chains and writes `receipt`, returning it as stored.
    pub fn append(&self, mut receipt: RunReceipt) -> Result<RunReceipt, ReceiptError> {
        let mut last = self.last_hash.lock().map_err(|_| ReceiptError::Io("lock poisoned".into()))?;
        receipt.prev_hash = last.clone();
        receipt.chain_hash = hash_receipt(&receipt);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ReceiptError::Io(e.to_string()))?;
        let line = serde_json::to_string(&receipt).map_err(|e| ReceiptError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| ReceiptError::Io(e.to_string()))?;
        *last = Some(receipt.chain_hash.clone());
        debug!(receipt = %receipt.receipt_id, "run receipt appended");
        Ok(receipt)
    }

    pub fn record(&self, result: &PipelineResult) -> Result<RunReceipt, ReceiptError> {
        self.append(RunReceipt::for_result(result))
    }
}

/// Checks every link of the chain; returns the number of receipts.
pub fn verify_log(path: impl AsRef<Path>) -> Result<usize, ReceiptError> {
    let receipts = read_all(path.as_ref())?;
    let mut prev: Option<String> = None;
    for (i, receipt) in receipts.iter().enumerate() {
        let line = i + 1;
        if receipt.prev_hash != prev {
            return Err(ReceiptError::Chain {
                line,
                message: "prev_hash does not match previous receipt".into(),
            });
        }
        if receipt.chain_hash != hash_receipt(receipt) {
            return Err(ReceiptError::Chain {
                line,
                message: "chain_hash does not match contents".into(),
            });
        }
        prev = Some(receipt.chain_hash.clone());
    }
    Ok(receipts.len())
}

/// The last `n` receipts, oldest first. A missing log is empty.
pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<RunReceipt>, ReceiptError> {
    let mut receipts = read_all(path.as_ref())?;
    let skip = receipts.len().saturating_sub(n);
    Ok(receipts.split_off(skip))
}

pub fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn hash_receipt(receipt: &RunReceipt) -> String {
    let mut h = Sha256::new();
    h.update(receipt.receipt_id.to_string());
    h.update(&receipt.timestamp);
    h.update(&receipt.question_hash);
    h.update(&receipt.sql_hash);
    for ws in &receipt.workspaces {
        h.update(ws);
        h.update([0u8]);
    }
    h.update([0xffu8]);
    for t in &receipt.tables {
        h.update(t);
        h.update([0u8]);
    }
    h.update([receipt.valid as u8, receipt.repaired as u8]);
    if let Some(prev) = &receipt.prev_hash {
        h.update(prev);
    }
    format!("{:x}", h.finalize())
}

fn read_all(path: &Path) -> Result<Vec<RunReceipt>, ReceiptError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| ReceiptError::Io(e.to_string()))?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ReceiptError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let receipt: RunReceipt = serde_json::from_str(&line).map_err(|e| ReceiptError::Parse {
            line: i + 1,
            message: e.to_string(),
        })?;
        out.push(receipt);
    }
    Ok(out)
}
