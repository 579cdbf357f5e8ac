//! `quire change` — inspect published change blobs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Subcommand};
use data_encoding::HEXLOWER;
use quire_core::change::{AccountKey, DeviceKey};
use quire_core::config::EngineConfig;
use quire_core::model::Value;
use quire_core::{MemoryStore, Replica, SignedChange};
use serde::Serialize;
use tracing::info;

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct ChangeArgs {
    #[command(subcommand)]
    pub command: ChangeCommand,
}

#[derive(Subcommand, Debug)]
pub enum ChangeCommand {
    /// Decode a change blob and list its datoms.
    #[command(after_help = "EXAMPLES:\n    quire change decode change-1.cbor\n    quire change decode change-1.cbor --no-verify --format json")]
    Decode(DecodeArgs),

    /// Write a small sample document's blobs to a directory.
    #[command(after_help = "EXAMPLES:\n    quire change sample --out /tmp/quire-sample")]
    Sample(SampleArgs),
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    pub file: PathBuf,

    /// Skip signature verification.
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Debug, Serialize)]
struct DatomLine {
    op: String,
    entity: String,
    attribute: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct DecodeOutput {
    id: String,
    object: String,
    author: String,
    signer: String,
    parents: Vec<String>,
    lamport_time: u64,
    create_time: String,
    kind: String,
    verified: bool,
    signature: Option<String>,
    datoms: Vec<DatomLine>,
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Ref(id) => format!("ref:{id}"),
        Value::String(s) => format!("{s:?}"),
        Value::Int(i) => i.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Bytes(b) => format!("bytes:{}", HEXLOWER.encode(b)),
        Value::Cid(c) => format!("cid:{c}"),
        Value::Structured(b) => format!("cbor:{}", HEXLOWER.encode(b)),
    }
}

fn format_micros(micros: i64) -> String {
    DateTime::from_timestamp_micros(micros).map_or_else(|| micros.to_string(), |t| t.to_rfc3339())
}

fn decode(bytes: Vec<u8>, verify: bool) -> Result<DecodeOutput> {
    let signed = if verify {
        SignedChange::from_bytes(bytes).context("change failed verification")?
    } else {
        SignedChange::from_bytes_unverified(bytes).context("not a change blob")?
    };
    let change = signed.change();
    let datoms = signed
        .datoms()
        .context("change body is malformed")?
        .iter()
        .map(|d| DatomLine {
            op: d.op.to_string(),
            entity: d.entity.to_string(),
            attribute: d.attribute.to_string(),
            value: format_value(&d.value),
        })
        .collect();

    Ok(DecodeOutput {
        id: signed.id().to_string(),
        object: change.object.to_string(),
        author: change.author.to_string(),
        signer: change.signer.to_string(),
        parents: change.parents.iter().map(ToString::to_string).collect(),
        lamport_time: change.lamport_time,
        create_time: format_micros(change.create_time),
        kind: change.kind.clone(),
        verified: verify,
        signature: change.signature.as_deref().map(|s| HEXLOWER.encode(s)),
        datoms,
    })
}

pub fn run_decode(args: &DecodeArgs, output: OutputMode) -> Result<()> {
    let bytes = fs::read(&args.file).with_context(|| format!("Failed to read {}", args.file.display()))?;
    let out = decode(bytes, !args.no_verify)?;

    render_mode(
        output,
        &out,
        |o, w| {
            writeln!(
                w,
                "change id={} lamport={} parents={} datoms={} verified={}",
                o.id,
                o.lamport_time,
                o.parents.len(),
                o.datoms.len(),
                o.verified
            )?;
            for d in &o.datoms {
                writeln!(w, "datom op={} entity={} attr={} value={}", d.op, d.entity, d.attribute, d.value)?;
            }
            Ok(())
        },
        |o, w| {
            pretty_section(w, &format!("Change {}", o.id))?;
            pretty_kv(w, "Object", &o.object)?;
            pretty_kv(w, "Author", &o.author)?;
            pretty_kv(w, "Signer", &o.signer)?;
            pretty_kv(w, "Lamport", o.lamport_time.to_string())?;
            pretty_kv(w, "Created", &o.create_time)?;
            pretty_kv(w, "Kind", &o.kind)?;
            pretty_kv(w, "Verified", o.verified.to_string())?;
            for parent in &o.parents {
                pretty_kv(w, "Parent", parent)?;
            }
            writeln!(w)?;
            pretty_section(w, "Datoms")?;
            for d in &o.datoms {
                writeln!(w, "{:<24} {:<10} {:<12} {}", d.op, d.entity, d.attribute, d.value)?;
            }
            Ok(())
        },
    )
}

#[derive(Debug, Serialize)]
struct SampleOutput {
    object: String,
    version: String,
    files: Vec<String>,
}

fn write_sample(dir: &Path) -> Result<SampleOutput> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut rng = rand::rngs::OsRng;
    let mut replica = Replica::new(
        MemoryStore::new(),
        DeviceKey::new(&mut rng),
        AccountKey::new(&mut rng),
        EngineConfig::default(),
    );
    let now = chrono::Utc::now().timestamp_micros();
    let object = replica.create_document(now)?;

    let mut doc = replica.open(&object)?;
    doc.change_title("Sample")?;
    doc.ensure_block_state("intro", b"hello")?;
    doc.move_block("intro", "", "")?;
    replica.commit(&mut doc, now)?;

    let mut doc = replica.open(&object)?;
    doc.ensure_block_state("outro", b"bye")?;
    doc.move_block("outro", "", "intro")?;
    replica.commit(&mut doc, now + 1)?;

    let mut files = Vec::new();
    let permanode = dir.join("permanode.cbor");
    fs::write(&permanode, replica.permanode(&object)?)?;
    files.push(permanode.display().to_string());
    for (i, bytes) in replica.changes(&object)?.iter().enumerate() {
        let path = dir.join(format!("change-{}.cbor", i + 1));
        fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        files.push(path.display().to_string());
    }
    info!(dir = %dir.display(), files = files.len(), "wrote sample document");

    Ok(SampleOutput {
        object: object.to_string(),
        version: replica.version(&object)?.to_string(),
        files,
    })
}

pub fn run_sample(args: &SampleArgs, output: OutputMode) -> Result<()> {
    let out = write_sample(&args.out)?;
    render_mode(
        output,
        &out,
        |o, w| {
            writeln!(w, "sample object={} version={}", o.object, o.version)?;
            for f in &o.files {
                writeln!(w, "file={f}")?;
            }
            Ok(())
        },
        |o, w| {
            pretty_section(w, "Sample Document")?;
            pretty_kv(w, "Object", &o.object)?;
            pretty_kv(w, "Version", &o.version)?;
            for f in &o.files {
                pretty_kv(w, "Wrote", f)?;
            }
            Ok(())
        },
    )
}
