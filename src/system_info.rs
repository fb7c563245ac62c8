use serde::Serialize;
use sysinfo::System;

use crate::config::Config;
use crate::ffmpeg;

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub cpus: usize,
    pub cpu_model: String,
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
    pub ffmpeg: String,
    pub ffprobe: String,
}

pub async fn get_system_info(config: &Config) -> SystemInfo {
    let mut system = System::new();
    system.refresh_all();

    let memory_total = system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0;
    let memory_free = system.free_memory() as f64 / 1024.0 / 1024.0 / 1024.0;

    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let not_available = || "not available".to_string();

    SystemInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpus: system.cpus().len(),
        cpu_model,
        memory_total_gb: memory_total,
        memory_free_gb: memory_free,
        ffmpeg: ffmpeg::tool_version(&config.media.ffmpeg_path)
            .await
            .unwrap_or_else(not_available),
        ffprobe: ffmpeg::tool_version(&config.media.ffprobe_path)
            .await
            .unwrap_or_else(not_available),
    }
}

pub async fn print_startup_info(config: &Config) {
    let sys_info = get_system_info(config).await;

    println!("{}", "=".repeat(60));
    println!("🚀 Tubely Backend Starting...");
    println!("{}", "=".repeat(60));
    println!("📊 Runtime Environment:");
    println!("   Version: {}", sys_info.version);
    println!("   Platform: {} ({})", sys_info.platform, sys_info.arch);
    println!("   CPUs: {} ({})", sys_info.cpus, sys_info.cpu_model);
    println!(
        "   Memory: {:.2} GB total, {:.2} GB free",
        sys_info.memory_total_gb, sys_info.memory_free_gb
    );
    println!("   FFmpeg: {}", sys_info.ffmpeg);
    println!("   FFprobe: {}", sys_info.ffprobe);
    println!("   Staging Dir: {:?}", config.staging_dir);
    println!(
        "   Max Upload: {:.2} MB",
        config.max_upload_bytes as f64 / 1024.0 / 1024.0
    );
    println!(
        "   Bucket: {} ({}, {:?} URLs)",
        config.storage.bucket, config.storage.region, config.storage.url_mode
    );
    println!("{}", "=".repeat(60));
}
