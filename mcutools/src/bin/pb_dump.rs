//! Dumps a binary parameter block file as YAML.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::Context;
use structopt::StructOpt;

use mculink::param::{CrcStatus, ParamBlock};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "pb-dump",
    about = "Command line tool to dump a parameter block file"
)]
struct Opt {
    /// parameter block file (default: stdin)
    #[structopt(parse(from_os_str))]
    file: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();

    // a wrong CRC is no reason to hide the content, only a wrong magic
    // or unreadable input is
    let (block, crc) = match &opt.file {
        Some(path) => {
            let mut f = File::open(path)
                .with_context(|| format!("cannot open '{}' for reading", path.display()))?;
            ParamBlock::read_lenient(&mut f)
                .with_context(|| format!("'{}' is not a valid parameter block", path.display()))?
        }
        None => {
            let mut input = Vec::new();
            io::stdin().read_to_end(&mut input)?;
            ParamBlock::read_lenient(&mut &input[..])
                .context("stdin is not a valid parameter block")?
        }
    };

    if let CrcStatus::Mismatch { stored, computed } = crc {
        eprintln!(
            "Warning: parameter block's CRC is wrong (stored 0x{stored:02x}, computed 0x{computed:02x}), dumping nevertheless."
        );
    }

    block.dump(&mut io::stdout())?;

    Ok(())
}
