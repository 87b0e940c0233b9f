use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};
use crate::pixel_format::FourCC;

/// 默认申请的缓冲区数量
pub const DEFAULT_BUFFER_COUNT: u32 = 4;
/// 单次等待的超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
/// 连续超时多少次后认为设备已经停摆
pub const DEFAULT_MAX_TIMEOUT_RETRIES: u32 = 10;

/// 缓冲区传输方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialize",
    derive(Serialize, Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum TransferStrategy {
    /// read() 直接读取到单个缓冲区
    Read,
    /// 驱动分配内存，mmap 到进程
    Mmap,
    /// 进程分配页对齐内存，交给驱动写入
    UserPtr,
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Mmap => write!(f, "mmap"),
            Self::UserPtr => write!(f, "userptr"),
        }
    }
}

impl FromStr for TransferStrategy {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "mmap" => Ok(Self::Mmap),
            "userptr" | "user-pointer" => Ok(Self::UserPtr),
            other => Err(CaptureError::InvalidConfig(format!(
                "unknown transfer strategy '{}'",
                other
            ))),
        }
    }
}

/// 单个设备的采集配置
///
/// 分辨率在 initialize 时固定，运行中不可修改。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct CaptureConfig {
    /// 设备节点路径 (e.g. "/dev/video0")
    pub device: PathBuf,

    pub width: u32,
    pub height: u32,

    #[cfg_attr(feature = "serialize", serde(with = "serde_fourcc"))]
    pub format: FourCC,

    pub strategy: TransferStrategy,

    /// 流式 I/O 申请的缓冲区数量，默认 4
    #[cfg_attr(feature = "serialize", serde(default = "default_buffer_count"))]
    pub buffer_count: u32,

    /// 单次等待超时
    #[cfg_attr(
        feature = "serialize",
        serde(
            rename = "timeout_ms",
            with = "serde_millis",
            default = "default_timeout"
        )
    )]
    pub timeout: Duration,

    /// 超时重试预算
    #[cfg_attr(feature = "serialize", serde(default = "default_max_timeout_retries"))]
    pub max_timeout_retries: u32,

    /// 设置后，参考管线会把转换后的帧保存到 `<save_dir>/<camera index>/`
    #[cfg_attr(
        feature = "serialize",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub save_dir: Option<PathBuf>,
}

impl CaptureConfig {
    /// 默认 640x480 UYVY，用户指针 I/O
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            width: 640,
            height: 480,
            format: FourCC::UYVY,
            strategy: TransferStrategy::UserPtr,
            buffer_count: DEFAULT_BUFFER_COUNT,
            timeout: DEFAULT_TIMEOUT,
            max_timeout_retries: DEFAULT_MAX_TIMEOUT_RETRIES,
            save_dir: None,
        }
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn format(mut self, format: FourCC) -> Self {
        self.format = format;
        self
    }

    pub fn strategy(mut self, strategy: TransferStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 设置缓冲区数量 (默认 4)
    pub fn buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_timeout_retries(mut self, retries: u32) -> Self {
        self.max_timeout_retries = retries;
        self
    }

    pub fn save_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// 最坏情况下一次 acquire 的阻塞时长
    pub fn worst_case_wait(&self) -> Duration {
        self.timeout * self.max_timeout_retries
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "{}: resolution {}x{} is empty",
                self.device.display(),
                self.width,
                self.height
            )));
        }
        if self.buffer_count == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "{}: buffer_count must be at least 1",
                self.device.display()
            )));
        }
        if self.max_timeout_retries == 0 {
            return Err(CaptureError::InvalidConfig(format!(
                "{}: max_timeout_retries must be at least 1",
                self.device.display()
            )));
        }
        if self.timeout.is_zero() {
            return Err(CaptureError::InvalidConfig(format!(
                "{}: timeout must be non-zero",
                self.device.display()
            )));
        }
        Ok(())
    }
}

/// 多设备配置
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct MultiCaptureConfig {
    pub devices: Vec<CaptureConfig>,
}

impl MultiCaptureConfig {
    pub fn new(devices: Vec<CaptureConfig>) -> Self {
        Self { devices }
    }

    /// 同一配置应用到多个设备节点
    pub fn uniform<I, P>(paths: I, template: &CaptureConfig) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let devices = paths
            .into_iter()
            .map(|path| CaptureConfig {
                device: path.into(),
                ..template.clone()
            })
            .collect();
        Self { devices }
    }

    #[cfg(feature = "serialize")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::InvalidConfig(e.to_string()))?;
        for device in &config.devices {
            device.validate()?;
        }
        tracing::debug!("Loaded {} device configurations", config.devices.len());
        Ok(config)
    }

    #[cfg(feature = "serialize")]
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }
}

#[cfg(feature = "serialize")]
fn default_buffer_count() -> u32 {
    DEFAULT_BUFFER_COUNT
}

#[cfg(feature = "serialize")]
fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

#[cfg(feature = "serialize")]
fn default_max_timeout_retries() -> u32 {
    DEFAULT_MAX_TIMEOUT_RETRIES
}

#[cfg(feature = "serialize")]
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(feature = "serialize")]
mod serde_fourcc {
    use crate::pixel_format::FourCC;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(cc: &FourCC, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(cc.to_string().trim_end())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<FourCC, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}
