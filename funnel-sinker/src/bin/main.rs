use anyhow::{bail, Result};
use clap::Parser;
use log::{error, info};

use funnel_core::error_bail;
use funnel_core::tool::init_log;
use funnel_sinker::chunk_pipeline::ChunkPipeline;
use funnel_sinker::output_checker::check_output;
use funnel_sinker::record::gen_records;

/// Drive repeated chunked export runs and check every output file for the
/// concurrent-writer malformations. Files of failing runs are kept for
/// analysis, clean files are removed.
#[derive(Parser, Debug)]
struct Args {
    /// Number of records per run.
    #[arg(long, default_value_t = 500)]
    num_records: usize,

    /// Records per chunk. Small chunks put more fragments in flight.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    chunk_size: usize,

    /// Number of concurrent formatting workers.
    #[arg(long, default_value_t = 8, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    worker_num: usize,

    /// Number of runs.
    #[arg(long, default_value_t = 100)]
    runs: usize,

    /// Directory for output files.
    #[arg(long, default_value = "funnel_out")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_log();

    let args = Args::parse();

    std::fs::create_dir_all(&args.output_dir)?;

    let mut count_failed = 0;

    for run in 0..args.runs {
        let filename = format!(
            "{}/mydata_{}_{}.json",
            args.output_dir,
            chrono::Local::now().format("%Y%m%d_%H%M%S%3f"),
            run
        );

        let records = gen_records(args.num_records);

        match ChunkPipeline::start_local_run(
            &filename,
            records.into_iter(),
            args.chunk_size,
            args.worker_num,
        )
        .await
        {
            Ok(_) => {
                let defects = check_output(&filename)?;

                if defects.is_empty() {
                    std::fs::remove_file(&filename)?;
                } else {
                    count_failed += 1;

                    for defect in &defects {
                        error!("run {}: {}", run, defect);
                    }
                    error!("run {} produced malformed output, kept: {}", run, filename);
                }
            }
            Err(e) => {
                count_failed += 1;
                error!("run {} failed: {}", run, e);
            }
        }
    }

    if count_failed > 0 {
        error_bail!("{} of {} runs failed", count_failed, args.runs);
    }

    info!("all {} runs clean", args.runs);

    Ok(())
}
