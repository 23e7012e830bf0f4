// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;

use waveform_tomo::io;
use waveform_tomo::MatrixEngine;

#[derive(Parser)]
#[command(
    name = "waveform-tomo",
    about = "Compute the normal equations AtA and Atd of a weighted design matrix"
)]
struct Cli {
    /// Weighted design matrix A (.npy, .txt or .dat)
    #[arg(short = 'a', long)]
    matrix: PathBuf,

    /// Weighted data vector d (.npy, .txt or .dat)
    #[arg(short = 'd', long)]
    data: PathBuf,

    /// Directory receiving ata.<ext> and atd.<ext>
    #[arg(short = 'o', long, default_value = ".")]
    out_dir: PathBuf,

    /// Output file extension: txt or npy
    #[arg(long, default_value = "txt")]
    format: String,

    /// Number of worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Largest number of output rows per work unit
    #[arg(long, default_value = "64")]
    block_rows: usize,

    /// Rows of A per reduction block of AtA and Atd
    #[arg(long, default_value = "1024")]
    reduce_rows: usize,

    /// Reuse a previously computed AtA instead of recomputing it
    #[arg(long)]
    reuse_ata: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.format != "txt" && cli.format != "npy" {
        bail!("--format must be 'txt' or 'npy', got '{}'", cli.format);
    }

    let a = io::load_matrix(&cli.matrix)
        .with_context(|| format!("loading design matrix {}", cli.matrix.display()))?;
    let d = io::load_vector(&cli.data)
        .with_context(|| format!("loading data vector {}", cli.data.display()))?;
    if d.len() != a.nrows() {
        bail!(
            "data vector has {} rows but the design matrix has {}",
            d.len(),
            a.nrows()
        );
    }
    log::info!("loaded A ({} x {}) and d", a.nrows(), a.ncols());

    let mut engine = MatrixEngine::new()
        .with_block_rows(cli.block_rows)
        .with_reduce_rows(cli.reduce_rows);
    if let Some(threads) = cli.threads {
        engine = engine.with_threads(threads);
    }

    let start = Instant::now();
    let ata = match &cli.reuse_ata {
        Some(path) => {
            let ata = io::load_matrix(path)
                .with_context(|| format!("loading AtA {}", path.display()))?;
            if ata.nrows() != ata.ncols() || ata.nrows() != a.ncols() {
                bail!(
                    "reused AtA is {} x {} but A has {} columns",
                    ata.nrows(),
                    ata.ncols(),
                    a.ncols()
                );
            }
            ata
        }
        None => engine.compute_ata(&a).context("computing AtA")?,
    };
    let atd = engine
        .compute_atd(&a, d.view())
        .context("computing Atd")?;
    let elapsed = start.elapsed();

    std::fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("creating {}", cli.out_dir.display()))?;
    let ata_path = cli.out_dir.join(format!("ata.{}", cli.format));
    let atd_path = cli.out_dir.join(format!("atd.{}", cli.format));
    io::save_matrix(&ata_path, &ata).with_context(|| format!("writing {}", ata_path.display()))?;
    io::save_vector(&atd_path, atd.view())
        .with_context(|| format!("writing {}", atd_path.display()))?;

    println!(
        "rows={} unknowns={} threads={} |d|={:.6e} elapsed={:.2}s",
        a.nrows(),
        a.ncols(),
        engine.num_threads(),
        d.dot(&d).sqrt(),
        elapsed.as_secs_f64()
    );
    Ok(())
}
