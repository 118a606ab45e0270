#![allow(missing_docs)]

use std::{
    ffi::OsString,
    io::{BufRead, BufReader},
};

use clap::Parser;
use color_eyre::eyre::{bail, WrapErr};
use pstore_util::hash::{hash_value, raw_index};
use pstore_weights::{WeightStore, Weights, WeightsConfig};

/// Accumulates labels per hashed feature.
///
/// Each input line holds a numeric label followed by whitespace separated feature tokens. Field 0
/// of a feature's bucket sums the labels, field 1 (with a stride of at least two) counts
/// occurrences.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    input: OsString,
    #[clap(short = 'b', long, default_value = "18")]
    bits: u32,
    #[clap(short = 's', long, default_value = "2")]
    stride_shift: u32,
    #[clap(long)]
    sparse: bool,
    /// Move dense weights into shared memory after loading.
    #[clap(long)]
    share: bool,
    /// Initial value of field 0 for every bucket.
    #[clap(long)]
    init: Option<f32>,
    /// Clear the occurrence counts before reporting.
    #[clap(long)]
    reset_counts: bool,
}

impl Args {
    fn config(&self) -> WeightsConfig {
        WeightsConfig {
            bits: self.bits,
            stride_shift: self.stride_shift,
            sparse: self.sparse,
        }
    }
}

fn accumulate(weights: &Weights<'_>, input: impl BufRead) -> color_eyre::Result<usize> {
    let stride_shift = weights.stride_shift();
    let mut examples = 0;
    for (line_number, line) in input.lines().enumerate() {
        let line = line?;
        let mut tokens = line.split_ascii_whitespace();
        let Some(label) = tokens.next() else {
            continue;
        };
        let label: f32 = label
            .parse()
            .wrap_err_with(|| format!("invalid label on line {}", line_number + 1))?;
        for token in tokens {
            let raw = raw_index(hash_value(token), stride_shift, 0);
            let sum = weights.field(raw);
            sum.set(sum.get() + label);
            if weights.stride() > 1 {
                let count = weights.field(raw + 1);
                count.set(count.get() + 1.0);
            }
        }
        examples += 1;
    }
    Ok(examples)
}

fn main() -> color_eyre::Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    pstore_logger::setup();

    let config = args.config();
    if args.share && config.sparse {
        bail!("sparse weights cannot be shared");
    }
    let mut weights = config.build()?;

    if let Some(value) = args.init {
        weights.set_default(move |fields, _| fields[0].set(value));
    }

    let input = std::fs::File::open(&args.input)
        .wrap_err_with(|| format!("cannot open {:?}", args.input))?;
    let examples = accumulate(&weights, BufReader::new(input))?;
    log::info!("read {examples} examples");

    if args.share {
        weights.promote_to_shared(config.length()?)?;
        log::info!("weights moved to shared memory");
    }

    if args.reset_counts && weights.stride() > 1 {
        weights.zero_field(1);
    }

    let mut touched = 0;
    let mut total = 0.0;
    for bucket in weights.iter() {
        let sum = bucket.first().get();
        if sum != 0.0 {
            touched += 1;
            total += sum;
        }
    }
    log::info!(
        "{touched} of {} allocated buckets hold a non-zero sum, total {total}",
        weights.bucket_count()
    );

    Ok(())
}
