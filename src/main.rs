//! Correctness and throughput runs for the bakery and delegation locks.

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use softmutex::stress::{run_bakery, run_delegation, Report, Workload, THREAD_COUNTS, WORKLOADS};
use softmutex::Spin;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "softmutex")]
#[command(about = "Stress the bakery and delegation locks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bakery lock once
    Bakery {
        #[command(flatten)]
        run: RunArgs,
        /// Wait policy: hint, yield or backoff
        #[arg(long, default_value = "yield")]
        spin: Spin,
    },
    /// Run the delegation lock once
    Delegation {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Both locks over every thread count and workloads 0, 10, 100 and 1000
    All {
        /// Operations per thread
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        /// Critical-section workloads to run, comma separated
        #[arg(long, value_delimiter = ',', default_values_t = WORKLOADS)]
        work: Vec<usize>,
        /// Bakery wait policy: hint, yield or backoff
        #[arg(long, default_value = "yield")]
        spin: Spin,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Operations per thread
    #[arg(long, default_value_t = 10_000)]
    ops: usize,
    /// Busy iterations inside the critical section
    #[arg(long, default_value_t = 0)]
    work: usize,
    /// Upper bound of random busy iterations between operations
    #[arg(long, default_value_t = 0)]
    outside_work: usize,
}

impl RunArgs {
    fn workload(&self) -> Workload {
        Workload {
            threads: self.threads,
            ops_per_thread: self.ops,
            work: self.work,
            outside_work: self.outside_work,
        }
    }
}

fn print(name: &str, w: &Workload, r: &Report) {
    println!(
        "{name:<10} threads: {:>2}, workload: {:>4}, time: {:>6} ms, throughput: {:>12.0} ops/sec, counter: {}/{}, max inside: {}, max spins: {} [{}]",
        w.threads,
        w.work,
        r.elapsed.as_millis(),
        r.throughput(),
        r.counter,
        r.expected,
        r.max_inside,
        r.max_spins,
        if r.passed() { "ok" } else { "FAILED" },
    );
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut failed = 0;
    let mut check = |name: &str, w: &Workload, r: Report| {
        print(name, w, &r);
        if !r.passed() {
            failed += 1;
        }
    };

    let command = cli.command.unwrap_or(Commands::All {
        ops: 10_000,
        work: WORKLOADS.to_vec(),
        spin: Spin::default(),
    });
    match command {
        Commands::Bakery { run, spin } => {
            let w = run.workload();
            check("bakery", &w, run_bakery(&w, spin)?);
        }
        Commands::Delegation { run } => {
            let w = run.workload();
            check("delegation", &w, run_delegation(&w)?);
        }
        Commands::All { ops, work, spin } => {
            for work in work {
                for threads in THREAD_COUNTS {
                    let w = Workload {
                        threads,
                        ops_per_thread: ops,
                        work,
                        outside_work: 0,
                    };
                    check("bakery", &w, run_bakery(&w, spin)?);
                    check("delegation", &w, run_delegation(&w)?);
                }
            }
        }
    }

    if failed > 0 {
        bail!("{failed} run(s) failed verification");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands};
    use clap::Parser;
    use softmutex::Spin;

    #[test]
    fn all_defaults_to_full_matrix() {
        let cli = Cli::try_parse_from(["softmutex", "all"]).unwrap();
        match cli.command {
            Some(Commands::All { ops, work, spin }) => {
                assert_eq!(ops, 10_000);
                assert_eq!(work, vec![0, 10, 100, 1000]);
                assert_eq!(spin, Spin::Yield);
            }
            _ => panic!("expected the all command"),
        }
    }

    #[test]
    fn all_takes_work_list_and_spin() {
        let cli =
            Cli::try_parse_from(["softmutex", "all", "--work", "5,50", "--spin", "backoff"]).unwrap();
        match cli.command {
            Some(Commands::All { work, spin, .. }) => {
                assert_eq!(work, vec![5, 50]);
                assert_eq!(spin, Spin::Backoff);
            }
            _ => panic!("expected the all command"),
        }
        assert!(Cli::try_parse_from(["softmutex", "all", "--spin", "busy"]).is_err());
    }
}
