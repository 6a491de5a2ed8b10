// 构建脚本: 静态链接 FFmpeg 时补充系统库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    // vcpkg 的 FFmpeg 静态库在 MSVC 下需要手动补齐 dshow 采集与 TLS 依赖
    if target_os == "windows" && target_env == "msvc" {
        for lib in ["strmiids", "ole32", "oleaut32", "vfw32", "secur32", "bcrypt", "mfuuid"] {
            println!("cargo:rustc-link-lib=dylib={}", lib);
        }
    }
}
