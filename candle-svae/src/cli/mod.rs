pub mod simulate;
pub mod train;

use clap::{Parser, Subcommand, ValueEnum};

pub use simulate::SimulateArgs;
pub use train::TrainArgs;

#[derive(Parser, Debug)]
#[command(
    version,
    name = "svae-cvi",
    about = "Structured VAE with a conjugate mixture prior",
    long_about = "Structured variational autoencoder whose latent prior is a\n\
		  Gaussian or Student-t mixture. Mixture parameters are updated\n\
		  by conjugate-computation variational inference (CVI), network\n\
		  weights by Adam."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Train a structured VAE",
        long_about = "Train on a synthetic dataset or a delimited data file.\n\
		      A JSON schedule expands list-valued entries into the\n\
		      cartesian product of configurations; each is run in turn."
    )]
    Train(TrainArgs),

    #[command(
        about = "Write a synthetic dataset",
        long_about = "Write well-separated clusters or a pinwheel to a\n\
		      data matrix and a label file."
    )]
    Simulate(SimulateArgs),
}

impl Commands {
    pub fn verbose(&self) -> bool {
        match self {
            Commands::Train(args) => args.verbose,
            Commands::Simulate(args) => args.verbose,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    pub fn to_device(self, device_no: usize) -> candle_core::Result<candle_core::Device> {
        match self {
            ComputeDevice::Metal => candle_core::Device::new_metal(device_no),
            ComputeDevice::Cuda => candle_core::Device::new_cuda(device_no),
            ComputeDevice::Cpu => Ok(candle_core::Device::Cpu),
        }
    }
}
