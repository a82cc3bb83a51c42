use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use affine_features::cli::{Cli, Command};
use affine_features::{
    draw_matches, load_config, shade_outside_mask, AffineInvariantFeature, FeatureParameters,
    FeatureSet, PipelineConfig, RecordFile, ResultMatcher, TargetDescription,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Command::GenerateParameters { kind, output } => generate_parameters(kind, &output),
        Command::GenerateTarget { image, output } => generate_target(&image, &output),
        Command::ExtractFeatures {
            parameters,
            target,
            output,
            config,
        } => extract_features(&parameters, &target, &output, config.as_deref()),
        Command::MatchFeatures {
            query,
            reference,
            draw,
            config,
        } => match_features(&query, &reference, draw.as_deref(), config.as_deref()),
    }
}

fn read_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("Failed to read config: {:?}", path))
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn load_records(path: &Path) -> Result<RecordFile> {
    RecordFile::load(path).with_context(|| format!("Failed to read record file: {:?}", path))
}

fn base_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn generate_parameters(kind: FeatureParameters, output: &Path) -> Result<()> {
    let mut records = RecordFile::new();
    records.insert(&kind)?;
    records
        .save(output)
        .with_context(|| format!("Failed to save parameters: {:?}", output))?;
    eprintln!("Saved {} parameters: {:?}", kind.kind(), output);
    Ok(())
}

fn generate_target(image: &Path, output: &Path) -> Result<()> {
    let image_path =
        fs::canonicalize(image).with_context(|| format!("Failed to open input file: {:?}", image))?;
    let (width, height) = image::image_dimensions(&image_path)
        .with_context(|| format!("Failed to read image header: {:?}", image_path))?;

    let target = TargetDescription::full_frame(image_path, width, height);
    let mut records = RecordFile::new();
    records.insert(&target)?;
    records
        .save(output)
        .with_context(|| format!("Failed to save target: {:?}", output))?;
    eprintln!("Saved target ({}x{}): {:?}", width, height, output);
    Ok(())
}

fn extract_features(
    parameters: &Path,
    target: &Path,
    output: &Path,
    config: Option<&Path>,
) -> Result<()> {
    let config = read_config(config)?;
    let params: FeatureParameters = load_records(parameters)?
        .get()?
        .with_context(|| format!("No FeatureParameters record in {:?}", parameters))?;
    let mut description: TargetDescription = load_records(target)?
        .get()?
        .with_context(|| format!("No TargetDescription record in {:?}", target))?;

    let base = base_dir(target);
    let data = description
        .to_data(&base)
        .with_context(|| format!("Failed to load target image: {:?}", description.image_path))?;
    // Stored records stay valid wherever the output file lands
    description.image_path = description.resolve_path(&base);

    let feature = AffineInvariantFeature::with_config(params.create_feature(), &config)?;
    let results = feature
        .detect_and_compute(&data)
        .context("Failed to extract features")?;
    eprintln!(
        "Extracted {} features from {} samples ({}x{})",
        results.len(),
        feature.policy().sample_count(),
        data.image.width(),
        data.image.height()
    );

    let mut records = RecordFile::new();
    records.insert(&params)?;
    records.insert(&description)?;
    records.insert(&results)?;
    records
        .save(output)
        .with_context(|| format!("Failed to save features: {:?}", output))?;
    eprintln!("Saved features: {:?}", output);
    Ok(())
}

fn match_features(
    query_path: &Path,
    reference_path: &Path,
    draw: Option<&Path>,
    config: Option<&Path>,
) -> Result<()> {
    let config = read_config(config)?;
    let query_records = load_records(query_path)?;
    let reference_records = load_records(reference_path)?;

    let query: FeatureSet = query_records
        .get()?
        .with_context(|| format!("No Results record in {:?}", query_path))?;
    let reference: FeatureSet = reference_records
        .get()?
        .with_context(|| format!("No Results record in {:?}", reference_path))?;

    let matcher = ResultMatcher::new(Arc::new(reference), config.matcher, &config.index)
        .context("Failed to index reference features")?;
    let result = matcher
        .match_features(&query, 0.0)
        .context("Failed to match features")?;

    let stats = result.stats;
    eprintln!(
        "Query {} / reference {} features: {} candidates, {} after ratio test, {} inliers",
        query.len(),
        matcher.reference().len(),
        stats.raw_candidates,
        stats.ratio_survivors,
        stats.inliers
    );
    if result.is_empty() {
        eprintln!("No reliable registration found");
    } else {
        eprintln!("Transform (query -> reference):");
        for row in 0..3 {
            eprintln!(
                "  [{:10.4}, {:10.4}, {:10.4}]",
                result.transform[(row, 0)],
                result.transform[(row, 1)],
                result.transform[(row, 2)]
            );
        }
    }

    if let Some(draw) = draw {
        let query_target: TargetDescription = query_records
            .get()?
            .with_context(|| format!("No TargetDescription record in {:?}", query_path))?;
        let reference_target: TargetDescription = reference_records
            .get()?
            .with_context(|| format!("No TargetDescription record in {:?}", reference_path))?;
        let q = query_target
            .to_data(&base_dir(query_path))
            .context("Failed to load query image")?;
        let r = reference_target
            .to_data(&base_dir(reference_path))
            .context("Failed to load reference image")?;

        let canvas = draw_matches(
            &shade_outside_mask(&q.image, &q.validity_mask()),
            &query.keypoints,
            &shade_outside_mask(&r.image, &r.validity_mask()),
            &matcher.reference().keypoints,
            &result.inlier_matches,
        );
        canvas
            .save(draw)
            .with_context(|| format!("Failed to save output: {:?}", draw))?;
        eprintln!("Saved match rendering: {:?}", draw);
    }

    Ok(())
}
