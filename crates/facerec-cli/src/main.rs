mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use facerec_core::codec;
use facerec_core::matcher::{self, EuclideanMatcher, Matcher};
use facerec_core::{
    Descriptor, DetectorModel, LandmarkModel, Landmarks, NamedDescriptor, PixelBuffer, Recognizer,
};
use facerec_onnx::OnnxEngine;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facerec", about = "Face detection, landmarks and descriptor matching")]
struct Cli {
    /// Model directory (overrides FACEREC_MODEL_DIR and the config file)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print face boxes as JSON
    Detect {
        image: PathBuf,
        #[arg(long)]
        upsample: Option<u32>,
        /// Detector variant: fast or accurate
        #[arg(long, default_value = "fast")]
        model: DetectorModel,
    },
    /// Print landmark contours as JSON
    Landmarks {
        image: PathBuf,
        /// Landmark variant: large (68 points) or small (5 points)
        #[arg(long, default_value = "large")]
        model: LandmarkModel,
    },
    /// Compute descriptors for every face
    Encode {
        image: PathBuf,
        #[arg(long)]
        jitters: Option<u32>,
        /// Write a binary descriptor stream here instead of printing JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Compare the first face in two images
    Compare {
        known: PathBuf,
        probe: PathBuf,
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// Add the first face in an image to a gallery file
    Enroll {
        /// Name to store with the descriptor
        name: String,
        image: PathBuf,
        #[arg(long)]
        gallery: PathBuf,
    },
    /// Match every face in an image against a gallery file
    Identify {
        image: PathBuf,
        #[arg(long)]
        gallery: PathBuf,
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// Show which model files are present
    Models,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    match cli.command {
        Commands::Models => print_models(&config),
        Commands::Detect {
            image,
            upsample,
            model,
        } => {
            let rec = open(&config)?;
            let img = load_image(&image)?;
            let upsample = upsample.unwrap_or(config.upsample);
            let boxes = rec.face_locations(&img, upsample as i32, model)?;
            println!("{}", serde_json::to_string_pretty(&boxes)?);
            Ok(())
        }
        Commands::Landmarks { image, model } => {
            let rec = open(&config)?;
            let img = load_image(&image)?;
            let faces: Vec<Landmarks> = match model {
                LandmarkModel::Large => rec
                    .face_landmarks(&img, None)?
                    .into_iter()
                    .map(Landmarks::Large)
                    .collect(),
                LandmarkModel::Small => rec
                    .face_landmarks_small(&img, None)?
                    .into_iter()
                    .map(Landmarks::Small)
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&faces)?);
            Ok(())
        }
        Commands::Encode {
            image,
            jitters,
            out,
        } => {
            let rec = open(&config)?;
            let img = load_image(&image)?;
            let jitters = jitters.unwrap_or(config.jitters);
            let faces = rec.detect_and_encode(&img, config.upsample as i32, jitters as i32)?;
            let descriptors: Vec<Descriptor> =
                faces.into_iter().filter_map(|f| f.descriptor).collect();

            match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    codec::write_encodings(std::io::BufWriter::new(file), &descriptors)?;
                    println!("wrote {} descriptors to {}", descriptors.len(), path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&descriptors)?),
            }
            Ok(())
        }
        Commands::Compare {
            known,
            probe,
            tolerance,
        } => {
            let rec = open(&config)?;
            let a = first_descriptor(&rec, &config, &known)?;
            let b = first_descriptor(&rec, &config, &probe)?;
            let tolerance = tolerance.unwrap_or(config.tolerance);
            let (matches, distances) = matcher::compare_faces_with_distances(&[a], &b, tolerance);
            println!(
                "distance {:.4}: {}",
                distances[0],
                if matches[0] { "match" } else { "no match" }
            );
            Ok(())
        }
        Commands::Enroll {
            name,
            image,
            gallery,
        } => {
            let rec = open(&config)?;
            let descriptor = first_descriptor(&rec, &config, &image)?;

            let mut records = if gallery.exists() {
                codec::load_gallery(&gallery)?
            } else {
                Vec::new()
            };
            let mut record = NamedDescriptor::new(name.clone(), descriptor);
            record.metadata = Some(serde_json::json!({ "source": image.display().to_string() }));
            records.push(record);
            codec::save_gallery(&gallery, &records)?;

            println!("enrolled {name} ({} records in {})", records.len(), gallery.display());
            Ok(())
        }
        Commands::Identify {
            image,
            gallery,
            tolerance,
        } => {
            let records = codec::load_gallery(&gallery)
                .with_context(|| format!("loading gallery {}", gallery.display()))?;
            let rec = open(&config)?;
            let img = load_image(&image)?;
            let tolerance = tolerance.unwrap_or(config.tolerance);
            let faces = rec.detect_and_encode(&img, config.upsample as i32, config.jitters as i32)?;

            for (i, face) in faces.iter().enumerate() {
                let loc = face.location;
                let Some(descriptor) = &face.descriptor else {
                    println!("face {i} at {loc:?}: no descriptor");
                    continue;
                };
                let result = EuclideanMatcher.compare(descriptor, &records, tolerance);
                match (result.name, result.distance) {
                    (Some(name), Some(d)) => println!("face {i}: {name} (distance {d:.4})"),
                    (None, Some(d)) => println!("face {i}: unknown (closest {d:.4})"),
                    _ => println!("face {i}: unknown (empty gallery)"),
                }
            }
            Ok(())
        }
    }
}

fn open(config: &Config) -> Result<Recognizer<OnnxEngine>> {
    facerec_onnx::open(&config.model_paths())
        .with_context(|| format!("loading models from {}", config.model_dir.display()))
}

fn load_image(path: &Path) -> Result<PixelBuffer> {
    Ok(PixelBuffer::open(path)?)
}

fn first_descriptor(
    rec: &Recognizer<OnnxEngine>,
    config: &Config,
    path: &Path,
) -> Result<Descriptor> {
    let img = load_image(path)?;
    let faces = rec.detect_and_encode(&img, config.upsample as i32, config.jitters as i32)?;
    match faces.into_iter().find_map(|f| f.descriptor) {
        Some(d) => Ok(d),
        None => bail!("no face found in {}", path.display()),
    }
}

fn print_models(config: &Config) -> Result<()> {
    println!("model directory: {}", config.model_dir.display());
    for status in config.model_paths().status() {
        let state = match (status.present, status.required) {
            (true, _) => "ok",
            (false, true) => "MISSING",
            (false, false) => "absent (optional)",
        };
        println!("  {:<14} {:<18} {}", status.name, state, status.path.display());
    }
    Ok(())
}
