//! Creates a binary parameter block from a YAML description.
//!
//! The YAML front-end is deliberately forgiving: list entries may be
//! plain scalars or mappings carrying the optional extra fields of the
//! versioned layout.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::Deserialize;
use structopt::StructOpt;

use mculink::param::{
    parse_contactor_type, parse_estop_type, parse_resistance_offset, parse_switch_time,
    parse_temperature, ParamBlock,
};
use mculink::{MAX_CONTACTORS, MAX_ESTOPS, MAX_PT1000S};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "pb-create",
    about = "Command line tool to create a binary parameter block file from a YAML file"
)]
struct Opt {
    /// use the given filename as input file (default: stdin)
    #[structopt(short = "i", long = "infile", parse(from_os_str))]
    infile: Option<PathBuf>,

    /// use the given filename for output (default: stdout)
    #[structopt(short = "o", long = "outfile", parse(from_os_str))]
    outfile: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Pt1000Entry {
    Scalar(String),
    Mapping {
        #[serde(rename = "abort-temperature")]
        abort_temperature: Option<String>,
        #[serde(rename = "resistance-offset")]
        resistance_offset: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContactorEntry {
    Scalar(String),
    Mapping {
        #[serde(rename = "type")]
        contactor_type: Option<String>,
        #[serde(rename = "close-time")]
        close_time: Option<String>,
        #[serde(rename = "open-time")]
        open_time: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct PbYaml {
    #[serde(default)]
    version: Option<u16>,
    #[serde(default)]
    pt1000s: Vec<Pt1000Entry>,
    #[serde(default)]
    contactors: Vec<ContactorEntry>,
    #[serde(default)]
    estops: Vec<String>,
}

fn build_block(yaml: &PbYaml) -> anyhow::Result<ParamBlock> {
    let mut block = ParamBlock::new();

    if let Some(version) = yaml.version {
        block.version = version;
    }

    if yaml.pt1000s.is_empty() && yaml.contactors.is_empty() && yaml.estops.is_empty() {
        bail!("no or wrong input data - YAML file is probably not UTF-8 encoded");
    }

    for (i, entry) in yaml.pt1000s.iter().enumerate() {
        if i >= MAX_PT1000S {
            eprintln!("Warning: ignoring surplus temperature value (#{})", i + 1);
            continue;
        }

        match entry {
            Pt1000Entry::Scalar(temp) => {
                block.temperatures[i] = parse_temperature(temp).with_context(|| {
                    format!("unit (°C) missing or wrong whitespace in '{temp}'?")
                })?;
            }
            Pt1000Entry::Mapping {
                abort_temperature,
                resistance_offset,
            } => {
                if let Some(temp) = abort_temperature {
                    block.temperatures[i] = parse_temperature(temp).with_context(|| {
                        format!("unit (°C) missing or wrong whitespace in '{temp}'?")
                    })?;
                }
                if let Some(offset) = resistance_offset {
                    block.resistance_offsets[i] = parse_resistance_offset(offset)?;
                }
            }
        }
    }

    for (i, entry) in yaml.contactors.iter().enumerate() {
        if i >= MAX_CONTACTORS {
            eprintln!(
                "Warning: ignoring surplus contactor configuration (#{})",
                i + 1
            );
            continue;
        }

        match entry {
            ContactorEntry::Scalar(kind) => {
                block.contactors[i] = parse_contactor_type(kind)?;
            }
            ContactorEntry::Mapping {
                contactor_type,
                close_time,
                open_time,
            } => {
                if let Some(kind) = contactor_type {
                    block.contactors[i] = parse_contactor_type(kind)?;
                }
                if let Some(time) = close_time {
                    block.contactor_close_times[i] = parse_switch_time(time)?;
                }
                if let Some(time) = open_time {
                    block.contactor_open_times[i] = parse_switch_time(time)?;
                }
            }
        }
    }

    for (i, entry) in yaml.estops.iter().enumerate() {
        if i >= MAX_ESTOPS {
            eprintln!("Warning: ignoring surplus estop configuration (#{})", i + 1);
            continue;
        }

        block.estops[i] = parse_estop_type(entry)?;
    }

    if yaml.pt1000s.len() < MAX_PT1000S {
        eprintln!(
            "Warning: only {} temperature value(s) set instead of expected {}.",
            yaml.pt1000s.len(),
            MAX_PT1000S
        );
    }
    if yaml.contactors.len() < MAX_CONTACTORS {
        eprintln!(
            "Warning: only {} contactor configuration(s) set instead of expected {}.",
            yaml.contactors.len(),
            MAX_CONTACTORS
        );
    }
    if yaml.estops.len() < MAX_ESTOPS {
        eprintln!(
            "Warning: only {} estop configuration(s) set instead of expected {}.",
            yaml.estops.len(),
            MAX_ESTOPS
        );
    }

    Ok(block)
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    let mut input = String::new();
    match &opt.infile {
        Some(path) => {
            File::open(path)
                .with_context(|| format!("cannot open '{}' for reading", path.display()))?
                .read_to_string(&mut input)
                .context("input is not valid UTF-8")?;
        }
        None => {
            io::stdin()
                .read_to_string(&mut input)
                .context("input is not valid UTF-8")?;
        }
    }

    let yaml: PbYaml = serde_yaml::from_str(&input).context("could not parse YAML input")?;
    let block = build_block(&yaml)?;

    match &opt.outfile {
        Some(path) => {
            let mut out = File::create(path)
                .with_context(|| format!("cannot open '{}' for writing", path.display()))?;
            block.write(&mut out)?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            block.write(&mut out)?;
            out.flush()?;
        }
    }

    Ok(())
}
