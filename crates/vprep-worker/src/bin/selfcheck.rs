use std::path::Path;

use vprep_media::{check_ffmpeg, check_ffprobe};
use vprep_worker::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    println!(
        "vprep-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_writable(&config.work_dir).await?;
    ensure_writable(&config.cache.dir).await?;
    ensure_writable(&config.optimized_dir()).await?;

    let ffmpeg = check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    let ffprobe = check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;
    println!("vprep-selfcheck: ffmpeg={} ffprobe={}", ffmpeg.display(), ffprobe.display());

    println!("vprep-selfcheck: ok");
    Ok(())
}

async fn ensure_writable(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let probe = dir.join(format!(".selfcheck-{}", uuid::Uuid::new_v4().simple()));
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", dir.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}
