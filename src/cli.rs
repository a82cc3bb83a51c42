use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::params::FeatureParameters;

#[derive(Parser, Debug)]
#[command(name = "affine-features")]
#[command(version, about = "Extract and match affine-invariant local features")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log per-sample and matching details
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write default parameters of a feature kind
    GenerateParameters {
        /// Feature kind
        #[arg(value_parser = parse_kind)]
        kind: FeatureParameters,
        /// Output record file
        output: PathBuf,
    },

    /// Write a target description covering the whole image
    GenerateTarget {
        /// Input image
        image: PathBuf,
        /// Output record file
        output: PathBuf,
    },

    /// Detect and describe affine-invariant features of a target
    ExtractFeatures {
        /// Record file holding the feature parameters
        parameters: PathBuf,
        /// Record file holding the target description
        target: PathBuf,
        /// Output record file
        output: PathBuf,
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Match the features of one file (query) against another (reference)
    MatchFeatures {
        /// Query features
        query: PathBuf,
        /// Reference features
        reference: PathBuf,
        /// Render the inlier matches to this image
        #[arg(short, long)]
        draw: Option<PathBuf>,
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn parse_kind(s: &str) -> Result<FeatureParameters, String> {
    FeatureParameters::from_kind(s).ok_or_else(|| {
        format!(
            "Unknown feature kind '{}', expected one of: {}",
            s,
            FeatureParameters::kinds().join(", ")
        )
    })
}
