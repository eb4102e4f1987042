mod constants;

use clap::Parser;
use serde::Serialize;
use sixloc_core::{haversine_km, CandidateOffset, Landmark, LandmarkStore};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use constants::*;

#[derive(Parser, Debug)]
#[command(about = "Summarize sixloc landmark stores")]
struct Args {
    #[arg(long)]
    landmarks: PathBuf,

    #[arg(long)]
    near_lat: Option<f64>,

    #[arg(long)]
    near_lon: Option<f64>,

    #[arg(long, default_value_t = DEFAULT_RADIUS_KM)]
    radius_km: f64,

    #[arg(long)]
    reliable_only: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Bounds {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct NearbyLandmark {
    ip: String,
    wan_mac: String,
    lat: f64,
    lon: f64,
    dist_km: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct NearReport {
    lat: f64,
    lon: f64,
    radius_km: f64,
    within: usize,
    nearest: Vec<NearbyLandmark>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    total: usize,
    reliable: usize,
    dynamic: usize,
    offsets: BTreeMap<CandidateOffset, usize>,
    bounds: Option<Bounds>,
    near: Option<NearReport>,
}

fn main() -> io::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();

    let store = LandmarkStore::load(&args.landmarks)?;
    let landmarks: Vec<&Landmark> = store
        .iter()
        .filter(|lm| !args.reliable_only || lm.is_reliable)
        .collect();

    let near = match (args.near_lat, args.near_lon) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        (None, None) => None,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "--near-lat and --near-lon must be given together",
            ));
        }
    };

    let report = build_report(&landmarks, near, args.radius_km);

    if args.json {
        let text = serde_json::to_string_pretty(&report)
            .unwrap_or_else(|_| "{\"error\":\"failed to serialize\"}".to_string());
        println!("{text}");
        return Ok(());
    }

    print_report(&report);
    Ok(())
}

fn build_report(landmarks: &[&Landmark], near: Option<(f64, f64)>, radius_km: f64) -> Report {
    let mut offsets = BTreeMap::new();
    for lm in landmarks {
        *offsets.entry(lm.source_offset).or_insert(0) += 1;
    }

    Report {
        total: landmarks.len(),
        reliable: landmarks.iter().filter(|lm| lm.is_reliable).count(),
        dynamic: landmarks.iter().filter(|lm| lm.is_dynamic).count(),
        offsets,
        bounds: bounds(landmarks),
        near: near.map(|(lat, lon)| near_report(landmarks, lat, lon, radius_km)),
    }
}

fn bounds(landmarks: &[&Landmark]) -> Option<Bounds> {
    let first = landmarks.first()?;
    let mut b = Bounds {
        min_lat: first.latitude,
        max_lat: first.latitude,
        min_lon: first.longitude,
        max_lon: first.longitude,
    };
    for lm in &landmarks[1..] {
        b.min_lat = b.min_lat.min(lm.latitude);
        b.max_lat = b.max_lat.max(lm.latitude);
        b.min_lon = b.min_lon.min(lm.longitude);
        b.max_lon = b.max_lon.max(lm.longitude);
    }
    Some(b)
}

fn near_report(landmarks: &[&Landmark], lat: f64, lon: f64, radius_km: f64) -> NearReport {
    let mut by_dist: Vec<NearbyLandmark> = landmarks
        .iter()
        .map(|lm| NearbyLandmark {
            ip: lm.ip.clone(),
            wan_mac: lm.wan_mac.clone(),
            lat: lm.latitude,
            lon: lm.longitude,
            dist_km: haversine_km(lat, lon, lm.latitude, lm.longitude),
        })
        .collect();
    by_dist.sort_by(|a, b| {
        a.dist_km
            .partial_cmp(&b.dist_km)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let within = by_dist.iter().filter(|n| n.dist_km <= radius_km).count();
    by_dist.truncate(NEAREST_LIMIT);
    NearReport {
        lat,
        lon,
        radius_km,
        within,
        nearest: by_dist,
    }
}

fn print_report(report: &Report) {
    println!(
        "Landmarks: {} (reliable {}, dynamic {})",
        report.total, report.reliable, report.dynamic
    );
    if report.total == 0 {
        return;
    }

    println!("\nSource offsets:");
    for (offset, count) in &report.offsets {
        let pct = *count as f64 * 100.0 / report.total as f64;
        println!("- {:+3}: {} ({:.1}%)", offset, count, pct);
    }

    if let Some(b) = &report.bounds {
        println!(
            "\nBounds: lat [{:.4}, {:.4}] lon [{:.4}, {:.4}]",
            b.min_lat, b.max_lat, b.min_lon, b.max_lon
        );
    }

    if let Some(near) = &report.near {
        println!(
            "\nWithin {:.1} km of ({:.4}, {:.4}): {}",
            near.radius_km, near.lat, near.lon, near.within
        );
        for n in &near.nearest {
            println!(
                "- {} wan={} ({:.4}, {:.4}) {:.2} km",
                n.ip, n.wan_mac, n.lat, n.lon, n.dist_km
            );
        }
    }
}
