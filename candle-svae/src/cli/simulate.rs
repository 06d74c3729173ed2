use crate::common_io::*;
use crate::datasets::*;
use clap::{Args, ValueEnum};
use log::info;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum SyntheticKind {
    Clusters,
    Pinwheel,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(long, value_enum, default_value = "clusters", help = "Kind of data")]
    kind: SyntheticKind,

    #[arg(long, default_value_t = 3, help = "Number of clusters (arms)")]
    num_clusters: usize,

    #[arg(long, default_value_t = 300, help = "Points per cluster")]
    num_per_cluster: usize,

    #[arg(long, default_value_t = 5.0, help = "Radius of the circle of cluster means")]
    separation: f64,

    #[arg(long, default_value_t = 0.5, help = "Within-cluster standard deviation")]
    std_dev: f64,

    #[arg(long, default_value_t = 0.3, help = "Pinwheel: spread along each arm")]
    radial_std: f64,

    #[arg(long, default_value_t = 0.05, help = "Pinwheel: spread across each arm")]
    tangential_std: f64,

    #[arg(long, default_value_t = 0.25, help = "Pinwheel: twist rate")]
    rate: f64,

    #[arg(long, default_value_t = 0, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        short,
        required = true,
        help = "Output prefix",
        long_help = "Writes {out}.data.tsv.gz and {out}.labels.txt.gz"
    )]
    out: PathBuf,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

pub fn run(args: &SimulateArgs) -> anyhow::Result<()> {
    let (data, labels) = match args.kind {
        SyntheticKind::Clusters => make_clusters(
            args.num_clusters,
            args.num_per_cluster,
            args.separation,
            args.std_dev,
            args.seed,
        )?,
        SyntheticKind::Pinwheel => make_pinwheel(
            args.radial_std,
            args.tangential_std,
            args.num_clusters,
            args.num_per_cluster,
            args.rate,
            args.seed,
        ),
    };

    let prefix = args.out.display().to_string();
    if let Some(dir) = args.out.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let data_file = format!("{}.data.tsv.gz", prefix);
    let label_file = format!("{}.labels.txt.gz", prefix);
    write_matrix(&data, &data_file)?;
    write_labels(&labels, &label_file)?;
    info!(
        "wrote {} x {} data to {} and labels to {}",
        data.nrows(),
        data.ncols(),
        data_file,
        label_file
    );
    Ok(())
}
