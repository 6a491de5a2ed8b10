//! FFmpeg 采集源 (ez-ffmpeg)
//!
//! 解码在独立线程中运行: FrameFilter 把 YUV420P 帧转成 RGBA, 通过小容量通道交给采集线程.
//! - 实时源: 通道满时丢弃新帧, 解码永远不等待下游
//! - 视频文件: 通道满时等待, 保证按顺序逐帧处理

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use tracing::{debug, info, warn};

use super::{CaptureSource, SourceKind};
use crate::config::SourceSpec;
use crate::error::{Result, SentinelError};
use crate::frame::Frame;
use crate::utils::join_with_timeout;

/// 最大支持分辨率
const MAX_DIMENSION: u32 = 4096;

/// 停止解码时等待解码线程退出的时间
const DECODE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 获取可用的摄像头设备列表
pub fn list_video_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}

// ========== 采集源 ==========

/// 一次解码会话 (解码线程 + 接收端)
struct DecodeSession {
    rx: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct FfmpegSource {
    spec: SourceSpec,
    frame_timeout: Duration,
    session: Option<DecodeSession>,
}

impl FfmpegSource {
    /// 打开输入源并开始解码
    pub fn open(spec: SourceSpec, frame_timeout: Duration) -> Result<Self> {
        if let SourceSpec::File(path) = &spec {
            if !path.is_file() {
                return Err(SentinelError::Capture(format!(
                    "video file not found: {}",
                    path.display()
                )));
            }
        }

        let mut source = Self {
            spec,
            frame_timeout,
            session: None,
        };
        source.start_decode()?;
        Ok(source)
    }

    fn start_decode(&mut self) -> Result<()> {
        let kind = self.spec.kind();
        let capacity = match kind {
            SourceKind::Live => 2,
            SourceKind::Finite => 4,
        };
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let filter = DecodeFilter::new(tx, stop.clone(), kind);
        let spec = self.spec.clone();

        let thread = thread::Builder::new()
            .name(format!("decode-{}", short_name(&spec)))
            .spawn(move || {
                if let Err(e) = run_decode(&spec, filter) {
                    warn!("❌ 解码失败 ({}): {}", spec, e);
                }
            })?;

        self.session = Some(DecodeSession { rx, stop, thread });
        Ok(())
    }

    fn stop_decode(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.stop.store(true, Ordering::Release);
        // 先丢弃接收端, 让阻塞在发送上的解码线程立即返回
        drop(session.rx);
        if join_with_timeout(session.thread, DECODE_JOIN_TIMEOUT).is_err() {
            warn!("⚠️ 解码线程未及时退出 ({}), 已分离", self.spec);
        }
    }
}

impl CaptureSource for FfmpegSource {
    fn kind(&self) -> SourceKind {
        self.spec.kind()
    }

    fn describe(&self) -> String {
        self.spec.to_string()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        // 实时源断开后, 下一次读取时重新连接
        if self.session.is_none() {
            self.start_decode()?;
        }
        let Some(session) = self.session.as_ref() else {
            return Err(SentinelError::Capture("decoder not running".to_string()));
        };

        match session.rx.recv_timeout(self.frame_timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Err(SentinelError::Timeout(format!(
                "no frame from {} within {:?}",
                self.spec, self.frame_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                self.stop_decode();
                match self.kind() {
                    SourceKind::Finite => Ok(None),
                    SourceKind::Live => Err(SentinelError::Capture(format!(
                        "stream {} ended",
                        self.spec
                    ))),
                }
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.stop_decode();
        self.start_decode()
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.stop_decode();
        debug!("采集源已释放: {}", self.spec);
    }
}

fn short_name(spec: &SourceSpec) -> String {
    match spec {
        SourceSpec::Device(index) => format!("dev{}", index),
        SourceSpec::Stream(_) => "stream".to_string(),
        SourceSpec::File(path) => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string()),
    }
}

// ========== FFmpeg 上下文 ==========

/// 在当前线程运行解码, 直到输入结束或过滤器要求停止
fn run_decode(spec: &SourceSpec, filter: DecodeFilter) -> std::result::Result<(), String> {
    let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
    let pipe = pipe.filter("decode", Box::new(filter));
    let out = create_null_output().add_frame_pipeline(pipe);

    let input = match spec {
        SourceSpec::Device(index) => {
            let url = device_url(*index);
            info!("📷 打开摄像头: {} ({})", url, device_format());
            Input::new(url).set_format(device_format())
        }
        SourceSpec::Stream(url) if url.to_ascii_lowercase().starts_with("rtsp://") => {
            info!("🔗 连接RTSP流: {}", url);
            Input::new(url.as_str()).set_input_opts(
                [
                    ("rtsp_transport", "tcp"),
                    ("buffer_size", "67108864"),
                    ("rtsp_flags", "prefer_tcp"),
                ]
                .into(),
            )
        }
        SourceSpec::Stream(url) => {
            info!("🔗 连接视频流: {}", url);
            Input::new(url.as_str())
        }
        SourceSpec::File(path) => {
            info!("🎞️ 打开视频文件: {}", path.display());
            Input::new(path.to_string_lossy().into_owned())
        }
    };

    let ctx = FfmpegContext::builder()
        .input(input)
        .filter_desc("format=yuv420p")
        .output(out)
        .build()
        .map_err(|e| format!("构建失败: {}", e))?;

    let sch = ctx.start().map_err(|e| format!("启动失败: {}", e))?;
    let _ = sch.wait();
    Ok(())
}

/// 摄像头URL - 根据平台选择
fn device_url(index: usize) -> String {
    #[cfg(target_os = "windows")]
    {
        // dshow 需要设备名称
        list_video_devices()
            .into_iter()
            .find(|(i, _)| *i == index)
            .map(|(_, name)| format!("video={}", name))
            .unwrap_or_else(|| format!("video={}", index))
    }
    #[cfg(target_os = "linux")]
    {
        format!("/dev/video{}", index)
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        format!("{}", index)
    }
}

fn device_format() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dshow"
    }
    #[cfg(target_os = "macos")]
    {
        "avfoundation"
    }
    #[cfg(target_os = "linux")]
    {
        "v4l2"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        "video4linux2"
    }
}

// ========== 解码过滤器 ==========

/// FFmpeg解码过滤器: YUV420P → RGBA 帧
struct DecodeFilter {
    tx: Sender<Frame>,
    stop: Arc<AtomicBool>,
    kind: SourceKind,
    seq: u64,
    total_frames: usize,
    dropped_frames: usize,
    last_report: Instant,
}

impl DecodeFilter {
    fn new(tx: Sender<Frame>, stop: Arc<AtomicBool>, kind: SourceKind) -> Self {
        Self {
            tx,
            stop,
            kind,
            seq: 0,
            total_frames: 0,
            dropped_frames: 0,
            last_report: Instant::now(),
        }
    }

    fn drop_frame(&mut self, reason: &str) {
        self.dropped_frames += 1;
        if self.total_frames <= 10 {
            debug!("⚠️ 丢弃帧 #{}: {}", self.total_frames, reason);
        }
    }

    /// 把一帧交给采集线程; 返回 Err 表示应停止解码
    fn deliver(&mut self, frame: Frame) -> std::result::Result<(), String> {
        match self.kind {
            SourceKind::Live => match self.tx.try_send(frame) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped_frames += 1;
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err("receiver closed".to_string()),
            },
            SourceKind::Finite => {
                let mut pending = frame;
                loop {
                    match self.tx.send_timeout(pending, Duration::from_millis(100)) {
                        Ok(()) => return Ok(()),
                        Err(SendTimeoutError::Timeout(frame)) => {
                            if self.stop.load(Ordering::Acquire) {
                                return Err("stopped".to_string());
                            }
                            pending = frame;
                        }
                        Err(SendTimeoutError::Disconnected(_)) => {
                            return Err("receiver closed".to_string())
                        }
                    }
                }
            }
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> std::result::Result<(), String> {
        debug!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: ez_ffmpeg::Frame,
        _ctx: &FrameFilterContext,
    ) -> std::result::Result<Option<ez_ffmpeg::Frame>, String> {
        if self.stop.load(Ordering::Acquire) {
            return Err("stopped".to_string());
        }
        self.total_frames += 1;

        let rgba = unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.drop_frame("空帧/损坏帧");
                return Ok(None);
            }

            let av = &*frame.as_ptr();
            let w = av.width.max(0) as u32;
            let h = av.height.max(0) as u32;
            if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
                self.drop_frame(&format!("非法分辨率 {}x{}", w, h));
                return Ok(None);
            }

            // 只丢弃严重错误的帧 (缺少参考帧、无效比特流)
            if av.decode_error_flags & 0x03 != 0 {
                self.drop_frame(&format!("解码错误标志=0x{:02x}", av.decode_error_flags));
                return Ok(None);
            }

            let planes = YuvPlanes {
                y: av.data[0],
                u: av.data[1],
                v: av.data[2],
                y_stride: av.linesize[0].max(0) as usize,
                uv_stride: av.linesize[1].max(0) as usize,
            };
            if planes.y.is_null() || planes.u.is_null() || planes.v.is_null() {
                self.drop_frame("YUV指针为空");
                return Ok(None);
            }
            if planes.y_stride < w as usize || planes.uv_stride < (w as usize).div_ceil(2) {
                self.drop_frame("步长异常");
                return Ok(None);
            }

            let mut buffer = vec![255u8; (w * h * 4) as usize];
            yuv420p_to_rgba(&planes, &mut buffer, w as usize, h as usize);
            (w, h, buffer)
        };

        self.seq += 1;
        let (w, h, buffer) = rgba;
        if let Some(decoded) = Frame::from_rgba(w, h, buffer, self.seq) {
            self.deliver(decoded)?;
        }

        if self.last_report.elapsed() >= Duration::from_secs(10) {
            debug!(
                "📺 解码统计: 总帧{} | 丢弃{}",
                self.total_frames, self.dropped_frames
            );
            self.last_report = Instant::now();
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        debug!(
            "✅ 解码线程退出 (总帧{}, 丢弃{})",
            self.total_frames, self.dropped_frames
        );
    }
}

struct YuvPlanes {
    y: *const u8,
    u: *const u8,
    v: *const u8,
    y_stride: usize,
    uv_stride: usize,
}

/// YUV420P → RGBA (BT.601, 定点运算)
///
/// # Safety
/// 三个平面指针必须在 `height` 行 × 对应步长范围内有效.
unsafe fn yuv420p_to_rgba(planes: &YuvPlanes, buffer: &mut [u8], width: usize, height: usize) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * planes.y_stride;
        let uv_row = (y >> 1) * planes.uv_stride;

        for x in 0..width {
            let y_val = *planes.y.add(y_row + x) as i32;
            let u_val = *planes.u.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *planes.v.add(uv_row + (x >> 1)) as i32 - 128;

            buffer[out_idx] = (y_val + ((v_val * 179) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 1] =
                (y_val - ((u_val * 44) >> 7) - ((v_val * 91) >> 7)).clamp(0, 255) as u8;
            buffer[out_idx + 2] = (y_val + ((u_val * 227) >> 7)).clamp(0, 255) as u8;
            out_idx += 4;
        }
    }
}
