use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    block_shift: Option<u32>,
    blocks_per_super: Option<usize>,
    max_arenas: Option<usize>,
    cpu_fallback: Option<usize>,
}

#[derive(Deserialize, Default)]
struct MapSection {
    max_seek: Option<usize>,
    max_full_collisions: Option<usize>,
    probe_step: Option<u64>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
    #[serde(default)]
    map: MapSection,
}

struct ResolvedConfig {
    block_shift: u32,
    block_size: usize,
    blocks_per_super: usize,
    max_arenas: usize,
    cpu_fallback: usize,
    map_max_seek: usize,
    map_max_full_collisions: usize,
    map_probe_step: u64,
}

fn resolve_config(cfg: &Config) -> ResolvedConfig {
    let block_shift = cfg.config.block_shift.unwrap_or(15);
    assert!(
        (13..=21).contains(&block_shift),
        "block_shift ({}) must be in 13..=21 (8 KiB to 2 MiB blocks)",
        block_shift
    );
    let block_size = 1usize << block_shift;

    let blocks_per_super = cfg.config.blocks_per_super.unwrap_or(256);
    assert!(
        blocks_per_super >= 2,
        "blocks_per_super ({}) must be >= 2",
        blocks_per_super
    );
    assert!(
        blocks_per_super * block_size <= 1 << 30,
        "super-allocation ({} bytes) must not exceed 1 GiB",
        blocks_per_super * block_size
    );

    let max_arenas = cfg.config.max_arenas.unwrap_or(64);
    assert!(max_arenas > 0, "max_arenas must be > 0");

    let cpu_fallback = cfg.config.cpu_fallback.unwrap_or(8);
    assert!(cpu_fallback > 0, "cpu_fallback must be > 0");

    let map_max_seek = cfg.map.max_seek.unwrap_or(96);
    assert!(map_max_seek > 0, "map.max_seek must be > 0");

    let map_max_full_collisions = cfg.map.max_full_collisions.unwrap_or(96);
    assert!(
        map_max_full_collisions > 0,
        "map.max_full_collisions must be > 0"
    );

    let map_probe_step = cfg.map.probe_step.unwrap_or(0x43F8_2D0B);
    assert!(
        map_probe_step & 1 == 1,
        "map.probe_step ({:#x}) must be odd so probes cover the table",
        map_probe_step
    );

    ResolvedConfig {
        block_shift,
        block_size,
        blocks_per_super,
        max_arenas,
        cpu_fallback,
        map_max_seek,
        map_max_full_collisions,
        map_probe_step,
    }
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const BLOCK_SHIFT: u32 = {};\n\
         pub const BLOCK_SIZE: usize = {};\n\
         pub const BLOCKS_PER_SUPER: usize = {};\n\
         pub const MAX_ARENAS: usize = {};\n\
         pub const CPU_FALLBACK: usize = {};\n\
         pub const MAP_MAX_SEEK: usize = {};\n\
         pub const MAP_MAX_FULL_COLLISIONS: usize = {};\n\
         pub const MAP_PROBE_STEP: u64 = {};\n",
        cfg.block_shift,
        cfg.block_size,
        cfg.blocks_per_super,
        cfg.max_arenas,
        cfg.cpu_fallback,
        cfg.map_max_seek,
        cfg.map_max_full_collisions,
        cfg.map_probe_step,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/slabkit.toml", manifest_dir)
}

fn main() {
    println!("cargo:rerun-if-env-changed=SLABKIT_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("SLABKIT_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);

    let config: Config = match fs::read_to_string(&config_path) {
        Ok(content) => toml::from_str(&content).expect("failed to parse TOML config"),
        Err(_) => Config::default(),
    };

    let resolved = resolve_config(&config);
    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
