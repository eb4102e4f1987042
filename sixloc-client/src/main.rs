use anyhow::Context;
use futures::stream::{self, StreamExt};
use sixloc_core::{
    decode, now_unix_ms, parse_address, Config, DecodeError, Geolocator, LandmarkStore,
    WigleClient, MAX_CACHE_TTL_DAYS,
};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: sixloc <config.json>");
        std::process::exit(1);
    }

    let cfg = Config::load(&args[1]).with_context(|| format!("loading {}", args[1]))?;
    validate_config(&cfg)?;

    let token = env::var(&cfg.api_token_env)
        .with_context(|| format!("oracle token not set in ${}", cfg.api_token_env))?;

    let hitlist_path = expand_tilde(&cfg.hitlist_path);
    let landmarks_path = expand_tilde(&cfg.landmarks_path);
    println!("sixloc running");
    println!("  oracle:    {}", cfg.oracle_url);
    println!("  hitlist:   {}", hitlist_path.display());
    println!("  landmarks: {}", landmarks_path.display());
    println!("  in flight: {}", cfg.max_in_flight);

    let oracle = WigleClient::new(
        &cfg.oracle_url,
        &token,
        cfg.connect_timeout(),
        cfg.lookup_timeout(),
    )?;
    let geo = Geolocator::from_config(&cfg, Arc::new(oracle));

    let mut store = LandmarkStore::load(&landmarks_path)
        .with_context(|| format!("loading {}", landmarks_path.display()))?;
    println!("  known:     {}", store.len());

    let lines = read_hitlist(&hitlist_path)
        .with_context(|| format!("reading {}", hitlist_path.display()))?;

    let checkpoint = Checkpoint {
        path: &landmarks_path,
        every: cfg.checkpoint_every,
    };
    let summary = run_import(&geo, &mut store, &lines, cfg.max_in_flight, Some(checkpoint)).await;

    store
        .save(&landmarks_path)
        .with_context(|| format!("saving {}", landmarks_path.display()))?;

    println!(
        "done: lines={} invalid={} not_eui64={} rotated={} known={} located={} unresolved={}",
        summary.lines,
        summary.invalid,
        summary.not_eui64,
        summary.rotated,
        summary.already_known,
        summary.located,
        summary.unresolved
    );
    Ok(())
}

fn validate_config(cfg: &Config) -> io::Result<()> {
    if cfg.hitlist_path.trim().is_empty() || cfg.landmarks_path.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "hitlistPath and landmarksPath must not be empty",
        ));
    }
    if cfg.lookup_timeout_ms == 0 || cfg.connect_timeout_ms == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "lookupTimeoutMs and connectTimeoutMs must be > 0",
        ));
    }
    if !(cfg.epsilon_km > 0.0) || cfg.min_points == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "epsilonKm must be > 0 and minPoints >= 1",
        ));
    }
    if cfg.cache_ttl_days == 0 || cfg.cache_ttl_days > MAX_CACHE_TTL_DAYS {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("cacheTtlDays must be in 1..={MAX_CACHE_TTL_DAYS}"),
        ));
    }
    if cfg.max_in_flight == 0 || cfg.cache_max_entries == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "maxInFlight and cacheMaxEntries must be > 0",
        ));
    }
    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Non-empty lines that are not `#` comments.
fn read_hitlist(path: &Path) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        out.push(line.to_string());
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
struct Checkpoint<'a> {
    path: &'a Path,
    every: usize,
}

/// An address still to be located. `dynamic` is set once a later line
/// moved the same interface identifier to a new prefix.
#[derive(Debug, Clone, Copy)]
struct Pending {
    addr: Ipv6Addr,
    dynamic: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ImportSummary {
    lines: usize,
    invalid: usize,
    not_eui64: usize,
    rotated: usize,
    already_known: usize,
    located: usize,
    unresolved: usize,
}

async fn run_import(
    geo: &Geolocator,
    store: &mut LandmarkStore,
    lines: &[String],
    max_in_flight: usize,
    checkpoint: Option<Checkpoint<'_>>,
) -> ImportSummary {
    let mut summary = ImportSummary {
        lines: lines.len(),
        ..ImportSummary::default()
    };

    let mut pending: Vec<Pending> = Vec::new();
    let mut pending_by_iid: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<Ipv6Addr> = HashSet::new();
    for line in lines {
        let addr = match parse_address(line) {
            Ok(addr) => addr,
            Err(err) => {
                warn!(error = %err, "skipping hitlist line");
                summary.invalid += 1;
                continue;
            }
        };
        let iid = match decode(&addr) {
            Ok((iid, _)) => iid,
            Err(DecodeError::NotEui64 { .. }) => {
                summary.not_eui64 += 1;
                continue;
            }
            Err(err) => {
                warn!(%addr, error = %err, "skipping hitlist line");
                summary.invalid += 1;
                continue;
            }
        };

        let ip = addr.to_string();
        let iid = iid.to_string();
        if let Some(rot) = store.check_prefix_rotation(&ip, &iid, now_unix_ms()) {
            println!("[~~] {} rotated from {}", rot.new_ip, rot.old_ip);
            summary.rotated += 1;
        }
        if store.contains(&ip) || !seen.insert(addr) {
            summary.already_known += 1;
            continue;
        }
        // Same host seen earlier in this run under another prefix: locate it
        // once, at the newest address.
        if let Some(&idx) = pending_by_iid.get(&iid) {
            println!("[~~] {} rotated from {}", addr, pending[idx].addr);
            summary.rotated += 1;
            summary.already_known += 1;
            pending[idx] = Pending {
                addr,
                dynamic: true,
            };
            continue;
        }
        pending_by_iid.insert(iid, pending.len());
        pending.push(Pending {
            addr,
            dynamic: false,
        });
    }

    let mut results = stream::iter(pending)
        .map(|p| async move { (p, geo.locate(&p.addr).await) })
        .buffer_unordered(max_in_flight.max(1));

    while let Some((Pending { addr, dynamic }, result)) = results.next().await {
        match result {
            Ok(Some(resolved)) => {
                println!(
                    "[ok] {} wan={} lat={:.5} lon={:.5} offset={} obs={}",
                    addr,
                    resolved.wan_mac,
                    resolved.hit.latitude,
                    resolved.hit.longitude,
                    resolved.hit.offset,
                    resolved.observations
                );
                let now = now_unix_ms();
                let mut landmark = resolved.into_landmark(&addr, now);
                if dynamic {
                    landmark.is_dynamic = true;
                    landmark.last_updated_ms = Some(now);
                }
                if store.insert_if_absent(landmark) {
                    summary.located += 1;
                    if let Some(cp) = checkpoint {
                        if cp.every > 0 && summary.located % cp.every == 0 {
                            if let Err(err) = store.save(cp.path) {
                                error!(path = %cp.path.display(), error = %err, "checkpoint failed");
                            }
                        }
                    }
                }
            }
            Ok(None) => {
                println!("[--] {} unresolved", addr);
                summary.unresolved += 1;
            }
            Err(err) => {
                println!("[!!] {} {}", addr, err);
                summary.invalid += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sixloc_core::{
        generate_candidates, ClusterParams, Coordinate, GeoOracle, Landmark, OracleError,
        QueryCache, StagedQuery,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const EUI_A: &str = "2001:db8:1:2:fffe:2233:4455:6677";
    const EUI_A_MOVED: &str = "2001:db8:9:9:fffe:2233:4455:6677";
    const EUI_B: &str = "2001:db8:1:2:fffe:aabb:ccdd:eeff";
    const SLAAC: &str = "2001:db8:1:2:211:22ff:fe33:4455";

    struct MapOracle {
        answers: HashMap<String, Coordinate>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeoOracle for MapOracle {
        async fn lookup(&self, bssid: &str) -> Result<Option<Coordinate>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answers.get(bssid).copied())
        }
    }

    fn sample_config() -> Config {
        config_from(r#"{"hitlistPath":"hits.txt","landmarksPath":"lm.jsonl"}"#)
    }

    fn config_from(raw: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, raw).unwrap();
        Config::load(&path).unwrap()
    }

    /// Oracle answering the given offsets around the WAN MAC of `ip`.
    fn oracle_for(ip: &str, hits: &[(i8, f64, f64)]) -> Arc<MapOracle> {
        let (_, mac) = decode(&ip.parse().unwrap()).unwrap();
        let candidates = generate_candidates(&mac);
        let answers = hits
            .iter()
            .map(|(off, lat, lon)| (candidates[off].clone(), Coordinate::new(*lat, *lon)))
            .collect();
        Arc::new(MapOracle {
            answers,
            calls: AtomicUsize::new(0),
        })
    }

    fn munich_oracle() -> Arc<MapOracle> {
        oracle_for(EUI_A, &[(0, 48.137, 11.575), (-1, 48.138, 11.576)])
    }

    fn locator(oracle: Arc<MapOracle>) -> Geolocator {
        let query = StagedQuery::new(oracle, QueryCache::default());
        Geolocator::new(query, ClusterParams::default())
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn validate_config_rejects_bad_values() {
        assert!(validate_config(&sample_config()).is_ok());

        let mut cfg = sample_config();
        cfg.min_points = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = sample_config();
        cfg.epsilon_km = f64::NAN;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = sample_config();
        cfg.max_in_flight = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = sample_config();
        cfg.landmarks_path = "  ".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn validate_config_bounds_cache_ttl() {
        let mut cfg = sample_config();
        cfg.cache_ttl_days = MAX_CACHE_TTL_DAYS;
        assert!(validate_config(&cfg).is_ok());

        cfg.cache_ttl_days = 0;
        assert!(validate_config(&cfg).is_err());

        cfg.cache_ttl_days = u64::MAX;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_tilde("rel/x"), PathBuf::from("rel/x"));
    }

    #[test]
    fn read_hitlist_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.txt");
        std::fs::write(&path, "# header\n2001:db8::1\n\n  2001:db8::2  \n").unwrap();
        let out = read_hitlist(&path).unwrap();
        assert_eq!(out, vec!["2001:db8::1".to_string(), "2001:db8::2".to_string()]);
    }

    #[tokio::test]
    async fn import_locates_and_counts() {
        let geo = locator(munich_oracle());
        let mut store = LandmarkStore::new();

        let input = lines(&["garbage", "2001:db8::1", SLAAC, EUI_A, EUI_A, EUI_B]);
        let summary = run_import(&geo, &mut store, &input, 4, None).await;

        assert_eq!(
            summary,
            ImportSummary {
                lines: 6,
                invalid: 1,
                not_eui64: 2,
                rotated: 0,
                already_known: 1,
                located: 1,
                unresolved: 1,
            }
        );
        let lm = store.get(EUI_A).unwrap();
        assert_eq!(lm.source_offset, 0);
        assert_eq!(lm.wan_mac, "fd:fe:22:55:66:77");
        assert!(!lm.is_dynamic);
        assert!(store.get(EUI_B).is_none());
    }

    #[tokio::test]
    async fn import_is_idempotent_and_tracks_rotation() {
        let oracle = munich_oracle();
        let geo = locator(Arc::clone(&oracle));
        let mut store = LandmarkStore::new();

        run_import(&geo, &mut store, &lines(&[EUI_A]), 2, None).await;
        let calls_after_first = oracle.calls.load(Ordering::SeqCst);
        assert_eq!(calls_after_first, 3);

        let again = run_import(&geo, &mut store, &lines(&[EUI_A]), 2, None).await;
        assert_eq!(again.already_known, 1);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), calls_after_first);

        let moved = run_import(&geo, &mut store, &lines(&[EUI_A_MOVED]), 2, None).await;
        assert_eq!(moved.rotated, 1);
        assert_eq!(moved.already_known, 1);
        assert_eq!(moved.located, 0);
        assert_eq!(store.len(), 1);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), calls_after_first);
        let lm: &Landmark = store.get(EUI_A_MOVED).unwrap();
        assert!(lm.is_dynamic);
        assert!(lm.last_updated_ms.is_some());
    }

    #[tokio::test]
    async fn rotation_within_one_hitlist_keeps_one_landmark() {
        let oracle = munich_oracle();
        let geo = locator(Arc::clone(&oracle));
        let mut store = LandmarkStore::new();

        let summary = run_import(&geo, &mut store, &lines(&[EUI_A, EUI_A_MOVED]), 4, None).await;

        assert_eq!(summary.rotated, 1);
        assert_eq!(summary.already_known, 1);
        assert_eq!(summary.located, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(EUI_A).is_none());
        let lm = store.get(EUI_A_MOVED).unwrap();
        assert_eq!(lm.interface_id, "fffe:2233:4455:6677");
        assert!(lm.is_dynamic);
        assert!(lm.last_updated_ms.is_some());
        // Located once, at the newer address.
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn import_checkpoints_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lm.jsonl");
        let geo = locator(munich_oracle());
        let mut store = LandmarkStore::new();
        let cp = Checkpoint {
            path: &path,
            every: 1,
        };
        run_import(&geo, &mut store, &lines(&[EUI_A]), 1, Some(cp)).await;
        let loaded = LandmarkStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains(EUI_A));
    }
}
