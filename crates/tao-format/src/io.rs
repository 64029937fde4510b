//! I/O 抽象层.
//!
//! 两层结构:
//! - [`DataSource`]: 容器级数据源 (文件区间、内存、网络), 线程安全,
//!   可以为每条轨道各自打开一个互不干扰的读取游标;
//! - [`IoContext`]: 单个读取游标, 带读缓冲区与常用的定长整数读取方法.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tao_core::{TaoError, TaoResult};

/// 容器级数据源
///
/// 每次调用 [`DataSource::open_reader`] 都返回一个独立游标,
/// 因此每条被选中的轨道都可以独占自己的读取位置.
pub trait DataSource: Send + Sync {
    /// 打开一个新的读取游标 (位置为 0)
    fn open_reader(&self) -> TaoResult<IoContext>;

    /// 数据总大小 (如果可知)
    fn size(&self) -> Option<u64>;

    /// 数据源地址 (文件路径或 URL), 用于按扩展名探测格式
    fn uri(&self) -> Option<&str> {
        None
    }

    /// 缓存状态, 仅带缓存的数据源 (如 HTTP 流式下载) 提供
    fn cache_status(&self) -> Option<CacheStatus> {
        None
    }
}

/// 带缓存数据源的缓存状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatus {
    /// 已缓存但尚未被读取的字节数
    pub remaining_bytes: u64,
    /// 下载是否已结束 (正常完成或出错)
    pub finished: bool,
}

/// I/O 后端 trait
///
/// 实现此 trait 以支持不同的读取来源.
pub trait IoBackend: Send {
    /// 读取数据到缓冲区, 返回 0 表示 EOF
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 定位 (seek)
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
    /// 获取当前位置
    fn position(&mut self) -> io::Result<u64>;
    /// 获取总大小 (如果可知)
    fn size(&self) -> Option<u64>;
    /// 是否支持 seek
    fn is_seekable(&self) -> bool;
}

/// 默认缓冲区大小 (32 KB)
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// I/O 上下文 (单个读取游标)
pub struct IoContext {
    /// 内部 I/O 实现
    inner: Box<dyn IoBackend>,
    /// 读缓冲区
    buffer: Vec<u8>,
    /// 缓冲区中的有效数据长度
    buf_len: usize,
    /// 缓冲区当前读取位置
    buf_pos: usize,
}

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        Self {
            inner: backend,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
        }
    }

    // ========================
    // 读取方法
    // ========================

    /// 读取指定字节数, 数据不足时返回 `TaoError::Eof`
    pub fn read_exact(&mut self, buf: &mut [u8]) -> TaoResult<()> {
        let mut total_read = 0;
        while total_read < buf.len() {
            let buffered = self.buf_len - self.buf_pos;
            if buffered > 0 {
                let to_copy = buffered.min(buf.len() - total_read);
                buf[total_read..total_read + to_copy]
                    .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + to_copy]);
                self.buf_pos += to_copy;
                total_read += to_copy;
            } else {
                self.buf_pos = 0;
                self.buf_len = self.inner.read(&mut self.buffer)?;
                if self.buf_len == 0 {
                    return Err(TaoError::Eof);
                }
            }
        }
        Ok(())
    }

    /// 尽量读取, 返回实际读取的字节数 (0 表示 EOF)
    pub fn read_partial(&mut self, buf: &mut [u8]) -> TaoResult<usize> {
        if self.buf_pos == self.buf_len {
            self.buf_pos = 0;
            self.buf_len = self.inner.read(&mut self.buffer)?;
        }
        let to_copy = (self.buf_len - self.buf_pos).min(buf.len());
        buf[..to_copy].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + to_copy]);
        self.buf_pos += to_copy;
        Ok(to_copy)
    }

    /// 读取 1 个字节
    pub fn read_u8(&mut self) -> TaoResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// 读取 u16 小端
    pub fn read_u16_le(&mut self) -> TaoResult<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// 读取 u32 小端
    pub fn read_u32_le(&mut self) -> TaoResult<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// 读取 u64 小端
    pub fn read_u64_le(&mut self) -> TaoResult<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// 读取 4 字节标签 (FourCC)
    pub fn read_tag(&mut self) -> TaoResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取指定数量的字节
    pub fn read_bytes(&mut self, count: usize) -> TaoResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: u64) -> TaoResult<()> {
        let buffered = (self.buf_len - self.buf_pos) as u64;
        if count <= buffered {
            self.buf_pos += count as usize;
            return Ok(());
        }
        if self.inner.is_seekable() {
            let target = self.position()? + count;
            self.seek(SeekFrom::Start(target))?;
            return Ok(());
        }
        // 不可 seek 的后端只能读取后丢弃
        let mut left = count;
        let mut scratch = [0u8; 4096];
        while left > 0 {
            let chunk = left.min(scratch.len() as u64) as usize;
            self.read_exact(&mut scratch[..chunk])?;
            left -= chunk as u64;
        }
        Ok(())
    }

    // ========================
    // 定位方法
    // ========================

    /// 定位到指定位置, 丢弃读缓冲区
    pub fn seek(&mut self, pos: SeekFrom) -> TaoResult<u64> {
        let pos = match pos {
            SeekFrom::Current(delta) => {
                let current = self.position()? as i64;
                let target = current.checked_add(delta).filter(|t| *t >= 0).ok_or_else(|| {
                    TaoError::InvalidArgument(format!("seek 位置越界: {current} + {delta}"))
                })?;
                SeekFrom::Start(target as u64)
            }
            other => other,
        };
        self.buf_len = 0;
        self.buf_pos = 0;
        Ok(self.inner.seek(pos)?)
    }

    /// 获取当前逻辑读取位置 (已扣除缓冲区中未消费的数据)
    pub fn position(&mut self) -> TaoResult<u64> {
        let backend_pos = self.inner.position()?;
        Ok(backend_pos - (self.buf_len - self.buf_pos) as u64)
    }

    /// 是否支持 seek
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    /// 获取总大小
    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }
}

// ========================
// 内存数据源
// ========================

/// 内存数据源, 所有游标共享同一份 `Bytes`
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    /// 从数据创建
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl DataSource for MemorySource {
    fn open_reader(&self) -> TaoResult<IoContext> {
        Ok(IoContext::new(Box::new(MemoryBackend::new(self.data.clone()))))
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// 内存 I/O 后端 (只读)
pub struct MemoryBackend {
    data: Bytes,
    pos: usize,
}

impl MemoryBackend {
    /// 从数据创建
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let to_read = buf.len().min(available);
        if to_read == 0 {
            return Ok(0);
        }
        buf[..to_read].copy_from_slice(&self.data[self.pos..self.pos + to_read]);
        self.pos += to_read;
        Ok(to_read)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = resolve_seek(pos, self.pos as u64, Some(self.data.len() as u64))?;
        self.pos = new_pos as usize;
        Ok(new_pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

// ========================
// 文件区间数据源
// ========================

/// 文件区间数据源
///
/// 对应 "文件描述符 + 偏移 + 长度" 的打开方式. 所有游标共享同一个文件句柄,
/// 每次读取在锁内先定位再读, 各游标的位置互不影响.
pub struct FileSource {
    file: Arc<Mutex<File>>,
    offset: u64,
    length: u64,
    path: Option<String>,
}

impl FileSource {
    /// 打开整个文件
    pub fn open(path: &str) -> TaoResult<Self> {
        let file = File::open(path)?;
        let mut source = Self::from_file(file, 0, u64::MAX)?;
        source.path = Some(path.to_string());
        Ok(source)
    }

    /// 以文件中的一段区间作为数据源
    ///
    /// `size` 超出文件末尾时截断到文件末尾, `offset` 超出文件大小时报错.
    pub fn from_file(file: File, offset: u64, size: u64) -> TaoResult<Self> {
        let file_len = file.metadata()?.len();
        if offset > file_len {
            return Err(TaoError::InvalidArgument(format!(
                "文件偏移越界: offset={offset}, 文件大小={file_len}"
            )));
        }
        let length = size.min(file_len - offset);
        log::debug!("文件数据源: offset={}, length={}", offset, length);
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            offset,
            length,
            path: None,
        })
    }
}

impl DataSource for FileSource {
    fn open_reader(&self) -> TaoResult<IoContext> {
        Ok(IoContext::new(Box::new(FileRangeBackend {
            file: Arc::clone(&self.file),
            offset: self.offset,
            length: self.length,
            pos: 0,
        })))
    }

    fn size(&self) -> Option<u64> {
        Some(self.length)
    }

    fn uri(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// 文件区间 I/O 后端
struct FileRangeBackend {
    file: Arc<Mutex<File>>,
    offset: u64,
    length: u64,
    pos: u64,
}

impl IoBackend for FileRangeBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.length.saturating_sub(self.pos);
        let to_read = (buf.len() as u64).min(available) as usize;
        if to_read == 0 {
            return Ok(0);
        }
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(self.offset + self.pos))?;
        let n = file.read(&mut buf[..to_read])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, Some(self.length))?;
        Ok(self.pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }

    fn size(&self) -> Option<u64> {
        Some(self.length)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 将 `SeekFrom` 解析为绝对位置
fn resolve_seek(pos: SeekFrom, current: u64, size: Option<u64>) -> io::Result<u64> {
    let new_pos = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::End(offset) => {
            let size = size.ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "大小未知, 无法从末尾 seek")
            })?;
            size as i64 + offset
        }
        SeekFrom::Current(offset) => current as i64 + offset,
    };
    if new_pos < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek 位置不能为负",
        ));
    }
    Ok(new_pos as u64)
}

// ========================
// HTTP 流式数据源
// ========================

#[cfg(feature = "http")]
pub use http::HttpSource;

#[cfg(feature = "http")]
mod http {
    use std::io::{self, SeekFrom};
    use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

    use tao_core::{TaoError, TaoResult};

    use super::{CacheStatus, DataSource, IoBackend, IoContext, resolve_seek};

    /// HTTP 流式下载共享缓冲区
    struct HttpStreamBuffer {
        /// 已下载的数据
        data: Vec<u8>,
        /// 总大小 (来自 Content-Length, None 表示未知)
        total_size: Option<u64>,
        /// 下载是否已结束
        finished: bool,
        /// 下载错误信息
        error: Option<String>,
        /// HTTP 连接是否已建立
        connected: bool,
        /// 是否请求中止下载
        aborted: bool,
        /// 所有游标读到过的最远位置
        read_high_water: u64,
    }

    type Shared = Arc<(Mutex<HttpStreamBuffer>, Condvar)>;

    fn lock(shared: &Mutex<HttpStreamBuffer>) -> MutexGuard<'_, HttpStreamBuffer> {
        shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// HTTP 流式数据源
    ///
    /// 后台线程把响应体下载到共享缓冲区, 各轨道游标按需读取.
    /// 前向读取会阻塞等待数据下载到位.
    pub struct HttpSource {
        shared: Shared,
        url: String,
    }

    impl HttpSource {
        /// 打开 URL, 可附带请求头 (如鉴权信息)
        pub fn open(url: &str, headers: &[(String, String)]) -> TaoResult<Self> {
            log::info!("正在连接: {}", url);
            let shared: Shared = Arc::new((
                Mutex::new(HttpStreamBuffer {
                    data: Vec::new(),
                    total_size: None,
                    finished: false,
                    error: None,
                    connected: false,
                    aborted: false,
                    read_high_water: 0,
                }),
                Condvar::new(),
            ));

            let worker_shared = Arc::clone(&shared);
            let url_owned = url.to_string();
            let headers_owned = headers.to_vec();
            std::thread::spawn(move || {
                download_worker(&url_owned, &headers_owned, &worker_shared);
            });

            // 等待 HTTP 连接建立或失败
            let (mutex, cvar) = &*shared;
            let mut sb = lock(mutex);
            while !sb.connected && !sb.finished {
                sb = cvar.wait(sb).unwrap_or_else(PoisonError::into_inner);
            }
            if let Some(ref err) = sb.error {
                return Err(TaoError::Network(err.clone()));
            }
            drop(sb);

            Ok(Self {
                shared,
                url: url.to_string(),
            })
        }
    }

    impl Drop for HttpSource {
        fn drop(&mut self) {
            let (mutex, cvar) = &*self.shared;
            lock(mutex).aborted = true;
            cvar.notify_all();
        }
    }

    impl DataSource for HttpSource {
        fn open_reader(&self) -> TaoResult<IoContext> {
            let total_size = lock(&self.shared.0).total_size;
            Ok(IoContext::new(Box::new(HttpBackend {
                shared: Arc::clone(&self.shared),
                pos: 0,
                total_size,
            })))
        }

        fn size(&self) -> Option<u64> {
            lock(&self.shared.0).total_size
        }

        fn uri(&self) -> Option<&str> {
            Some(&self.url)
        }

        fn cache_status(&self) -> Option<CacheStatus> {
            let sb = lock(&self.shared.0);
            Some(CacheStatus {
                remaining_bytes: (sb.data.len() as u64).saturating_sub(sb.read_high_water),
                finished: sb.finished,
            })
        }
    }

    /// HTTP 读取游标
    struct HttpBackend {
        shared: Shared,
        pos: u64,
        total_size: Option<u64>,
    }

    impl IoBackend for HttpBackend {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if buf.is_empty() {
                return Ok(0);
            }
            let (mutex, cvar) = &*self.shared;
            let mut sb = lock(mutex);
            loop {
                let pos = self.pos as usize;
                if pos < sb.data.len() {
                    let to_read = buf.len().min(sb.data.len() - pos);
                    buf[..to_read].copy_from_slice(&sb.data[pos..pos + to_read]);
                    self.pos += to_read as u64;
                    sb.read_high_water = sb.read_high_water.max(self.pos);
                    return Ok(to_read);
                }
                if sb.finished {
                    if let Some(ref err) = sb.error {
                        return Err(io::Error::other(err.clone()));
                    }
                    return Ok(0);
                }
                sb = cvar.wait(sb).unwrap_or_else(PoisonError::into_inner);
            }
        }

        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.pos = resolve_seek(pos, self.pos, self.total_size)?;
            Ok(self.pos)
        }

        fn position(&mut self) -> io::Result<u64> {
            Ok(self.pos)
        }

        fn size(&self) -> Option<u64> {
            self.total_size
        }

        fn is_seekable(&self) -> bool {
            true
        }
    }

    /// HTTP 后台下载工作线程
    fn download_worker(url: &str, headers: &[(String, String)], shared: &Shared) {
        let (mutex, cvar) = &**shared;

        let mut request = ureq::get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let mut response = match request.call() {
            Ok(resp) => resp,
            Err(e) => {
                let mut sb = lock(mutex);
                sb.error = Some(format!("HTTP 请求失败: {}", e));
                sb.finished = true;
                sb.connected = true;
                cvar.notify_all();
                return;
            }
        };

        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        {
            let mut sb = lock(mutex);
            sb.total_size = content_length;
            sb.connected = true;
            // 预分配缓冲区 (上限 64 MB 避免过度分配)
            if let Some(len) = content_length {
                sb.data.reserve((len as usize).min(64 * 1024 * 1024));
            }
            cvar.notify_all();
        }
        log::info!("HTTP 连接成功, 内容大小: {:?}", content_length);

        let mut reader = response.body_mut().as_reader();
        let mut chunk = [0u8; 32 * 1024];
        loop {
            if lock(mutex).aborted {
                log::debug!("HTTP 下载被中止");
                return;
            }
            match io::Read::read(&mut reader, &mut chunk) {
                Ok(0) => {
                    let mut sb = lock(mutex);
                    log::info!("HTTP 下载完成, 共 {} 字节", sb.data.len());
                    sb.finished = true;
                    cvar.notify_all();
                    return;
                }
                Ok(n) => {
                    lock(mutex).data.extend_from_slice(&chunk[..n]);
                    cvar.notify_all();
                }
                Err(e) => {
                    log::error!("HTTP 下载错误: {}", e);
                    let mut sb = lock(mutex);
                    sb.error = Some(format!("网络读取错误: {}", e));
                    sb.finished = true;
                    cvar.notify_all();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_内存游标互不干扰() {
        let source = MemorySource::new(vec![1u8, 2, 3, 4, 5, 6]);
        let mut a = source.open_reader().unwrap();
        let mut b = source.open_reader().unwrap();
        assert_eq!(a.read_u8().unwrap(), 1);
        assert_eq!(a.read_u8().unwrap(), 2);
        assert_eq!(b.read_u8().unwrap(), 1);
        assert_eq!(a.position().unwrap(), 2);
        assert_eq!(b.position().unwrap(), 1);
    }

    #[test]
    fn test_读取越界返回_eof() {
        let source = MemorySource::new(vec![1u8, 2]);
        let mut io = source.open_reader().unwrap();
        assert!(matches!(io.read_u32_le(), Err(TaoError::Eof)));
    }

    #[test]
    fn test_seek_丢弃缓冲区() {
        let source = MemorySource::new((0u8..100).collect::<Vec<_>>());
        let mut io = source.open_reader().unwrap();
        assert_eq!(io.read_u8().unwrap(), 0);
        io.seek(SeekFrom::Start(50)).unwrap();
        assert_eq!(io.read_u8().unwrap(), 50);
        io.seek(SeekFrom::Current(-11)).unwrap();
        assert_eq!(io.read_u8().unwrap(), 40);
        io.skip(9).unwrap();
        assert_eq!(io.read_u8().unwrap(), 50);
    }

    #[test]
    fn test_文件区间数据源() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"HEADERpayload-bytesTRAILER").unwrap();
        let source = FileSource::from_file(file, 6, 13).unwrap();
        assert_eq!(source.size(), Some(13));

        let mut a = source.open_reader().unwrap();
        let mut b = source.open_reader().unwrap();
        assert_eq!(a.read_bytes(7).unwrap(), b"payload");
        assert_eq!(b.read_bytes(3).unwrap(), b"pay");
        assert_eq!(a.read_bytes(6).unwrap(), b"-bytes");
        assert!(matches!(a.read_u8(), Err(TaoError::Eof)));
    }

    #[test]
    fn test_文件区间截断与越界() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        let clone = file.try_clone().unwrap();
        let source = FileSource::from_file(file, 4, 1000).unwrap();
        assert_eq!(source.size(), Some(6));
        assert!(matches!(
            FileSource::from_file(clone, 11, 1),
            Err(TaoError::InvalidArgument(_))
        ));
    }
}
