use anyhow::Result;
use clap::Parser;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use tracing::{error, info};

use fgd_dem::index::{enumerate, require_meshes, validate_mesh_filters, MeshUnit, MESH_GRID};
use fgd_dem::merge::{merge_mesh, MergeOptions, MergeStats};
use fgd_dem::parser::read_metadata;
use fgd_dem::writer::GeoTiffWriter;
use fgd_dem::zip_handler::expand_archives;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 入力DEMファイル (FG-GML-*.xml / *.zip) を含むディレクトリ
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// 処理対象の2次メッシュコード (9999-99形式、省略時は全メッシュ)
    #[arg(value_name = "MESH")]
    meshes: Vec<String>,

    /// 出力ディレクトリ
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output: PathBuf,

    /// 2次メッシュ単位のGeoTIFFを出力
    #[arg(long = "dem10", visible_alias = "output-mesh2")]
    dem10: bool,

    /// 3次メッシュ単位のGeoTIFFを出力
    #[arg(long = "dem5", visible_alias = "output-mesh3")]
    dem5: bool,

    /// 2次メッシュのTerrain-RGBプレビューを出力
    #[arg(long)]
    debug_dem10: bool,

    /// 3次メッシュのTerrain-RGBプレビューを出力
    #[arg(long)]
    debug_dem5: bool,

    /// メタデータ一覧のみ表示 (ラスタは構築しない)
    #[arg(long)]
    list: bool,

    /// 並列処理スレッド数（デフォルト: CPUコア数）
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let start_time = std::time::Instant::now();

    // メッシュ指定の検証はファイルI/Oより前に行う
    validate_mesh_filters(&args.meshes)?;

    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .expect("Failed to build thread pool");
    }

    if !args.input.is_dir() {
        error!("Invalid input path: {:?}", args.input);
        anyhow::bail!("Input path must be a directory");
    }

    // ZIP配布データは一時ディレクトリに展開してからインデックスに加える
    let mut roots = vec![args.input.clone()];
    let extracted = expand_archives(&args.input)?;
    if let Some(dir) = &extracted {
        roots.push(dir.path().to_path_buf());
    }

    let units = enumerate(&roots)?;
    info!("Found {} DEM10 mesh unit(s)", units.len());

    // 明示的に要求されたメッシュはDEM10が解決されていなければならない
    let mut missing = 0usize;
    for mesh in &args.meshes {
        if let Err(e) = require_meshes(&units, std::slice::from_ref(mesh)) {
            error!("{e}");
            missing += 1;
        }
    }
    if missing > 0 {
        anyhow::bail!("{missing} requested mesh(es) have no DEM10 file");
    }

    let selected: Vec<&MeshUnit> = units
        .iter()
        .filter(|u| args.meshes.is_empty() || args.meshes.contains(&u.mesh2))
        .collect();

    if args.list {
        list_dems(&selected)?;
        return Ok(());
    }

    // DEMCMD 環境変数は CLI フラグに優先して出力単位を強制する
    let (output_mesh2, output_mesh3) = match std::env::var("DEMCMD") {
        Ok(cmd) => parse_demcmd(&cmd),
        Err(_) => (args.dem10, args.dem5),
    };
    let opts = MergeOptions {
        output_mesh2,
        output_mesh3,
        preview_mesh2: args.debug_dem10,
        preview_mesh3: args.debug_dem5,
    };
    let writer = GeoTiffWriter::new(&args.output);

    // 2次メッシュ同士は独立なので並列に処理し、統計は合流後に合算する
    let results: Vec<(String, Result<MergeStats>)> = selected
        .par_iter()
        .map(|&unit| (unit.mesh2.clone(), merge_mesh(unit, &opts, &writer)))
        .collect();

    let mut stats = MergeStats::default();
    let mut failed = 0usize;
    for (mesh2, result) in results {
        match result {
            Ok(s) => stats += s,
            Err(e) => {
                failed += 1;
                error!("{mesh2}: {e:#}");
            }
        }
    }

    info!("DEM10 files read: {}", stats.dem10_read);
    info!("DEM5 files read: {}", stats.dem5_read);
    if stats.mesh2_written > 0 {
        info!("GeoTIFF files written (2nd mesh): {}", stats.mesh2_written);
    }
    if stats.mesh3_written > 0 {
        info!("GeoTIFF files written (3rd mesh): {}", stats.mesh3_written);
    }
    info!("Total processing time: {:?}", start_time.elapsed());

    if failed > 0 {
        anyhow::bail!("{failed} mesh(es) failed to merge");
    }
    Ok(())
}

/// 指定メッシュのメタデータ一覧を表示する。ラスタは構築しない
fn list_dems(units: &[&MeshUnit]) -> Result<()> {
    for unit in units {
        let meta10 = read_metadata(&unit.dem10_path)?;
        println!("{} {}", unit.dem10_path.display(), meta10);
        for y in 0..MESH_GRID {
            for x in 0..MESH_GRID {
                if let Some(path) = &unit.dem5_paths[y][x] {
                    let meta5 = read_metadata(path)?;
                    println!("    {}:{}", path.display(), meta5);
                }
            }
        }
    }
    Ok(())
}

fn parse_demcmd(cmd: &str) -> (bool, bool) {
    let mut mesh2 = false;
    let mut mesh3 = false;
    for part in cmd.split(',') {
        match part.trim() {
            "--dem10" => mesh2 = true,
            "--dem5" => mesh3 = true,
            _ => {}
        }
    }
    (mesh2, mesh3)
}
