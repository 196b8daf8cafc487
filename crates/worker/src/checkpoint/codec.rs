use std::path::Path;

use hashfleet_core::{HashfleetError, HashfleetResult};

/// hashcat 文档中记录的结构体大小（不含两处 4 字节填充）
pub const RESTORE_STRUCT_SIZE: usize = 283;

/// 磁盘上固定头部的实际长度
pub const HEADER_LEN: usize = 296;

const WORKING_DIR_LEN: usize = 256;

/// hashcat `.restore` 检查点文件
///
/// 布局（小端序）：
///
/// | 偏移 | 长度 | 字段 |
/// |---|---|---|
/// | 0 | 4 | version |
/// | 4 | 256 | working directory，NUL 填充 |
/// | 260 | 4 | dictionary position |
/// | 264 | 4 | masks position |
/// | 268 | 4 | 填充 |
/// | 272 | 8 | words position |
/// | 280 | 4 | argument count |
/// | 284 | 4 | 填充 |
/// | 288 | 8 | argv 指针（未使用） |
/// | 296 | .. | 以换行结尾的参数，每行一个 |
///
/// 未修改的数据重新编码后与原始字节完全一致：工作目录缓冲区、填充字节以及参数之后的
/// 多余数据都会被原样保留。非 UTF-8 的路径按有损方式展示，未修改时写回原始字节。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreData {
    pub version: u32,
    pub working_directory: String,
    pub dictionary_position: u32,
    pub masks_position: u32,
    pub words_position: u64,
    pub arg_count: u32,
    pub argv_pointer: u64,
    /// 参数，不含结尾换行
    pub args: Vec<String>,
    raw_working_directory: Option<[u8; WORKING_DIR_LEN]>,
    raw_args: Vec<Vec<u8>>,
    padding: [[u8; 4]; 2],
    trailing: Vec<u8>,
}

impl Default for RestoreData {
    fn default() -> Self {
        Self {
            version: 0,
            working_directory: String::new(),
            dictionary_position: 0,
            masks_position: 0,
            words_position: 0,
            arg_count: 0,
            argv_pointer: 0,
            args: Vec::new(),
            raw_working_directory: None,
            raw_args: Vec::new(),
            padding: [[0; 4]; 2],
            trailing: Vec::new(),
        }
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
        self.pos += N;
        buf
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}

impl RestoreData {
    /// 只带参数的检查点，其余字段为零
    pub fn new(args: Vec<String>) -> Self {
        Self {
            arg_count: args.len() as u32,
            args,
            ..Default::default()
        }
    }

    /// 解析检查点字节
    pub fn decode(bytes: &[u8]) -> HashfleetResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(HashfleetError::Checkpoint(format!(
                "检查点数据过短: {} 字节，至少需要 {} 字节",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let mut reader = ByteReader { bytes, pos: 0 };
        let version = reader.u32();
        let raw_dir: [u8; WORKING_DIR_LEN] = reader.take();
        let dictionary_position = reader.u32();
        let masks_position = reader.u32();
        let pad0: [u8; 4] = reader.take();
        let words_position = reader.u64();
        let arg_count = reader.u32();
        let pad1: [u8; 4] = reader.take();
        let argv_pointer = reader.u64();

        let dir_end = raw_dir.iter().position(|b| *b == 0).unwrap_or(WORKING_DIR_LEN);
        let working_directory = String::from_utf8_lossy(&raw_dir[..dir_end]).into_owned();

        let mut rest = &bytes[HEADER_LEN..];
        let mut args = Vec::new();
        let mut raw_args = Vec::new();
        while args.len() < arg_count as usize {
            let Some(newline) = rest.iter().position(|b| *b == b'\n') else {
                break;
            };
            let raw = &rest[..newline];
            args.push(String::from_utf8_lossy(raw).into_owned());
            raw_args.push(raw.to_vec());
            rest = &rest[newline + 1..];
        }

        Ok(Self {
            version,
            working_directory,
            dictionary_position,
            masks_position,
            words_position,
            arg_count,
            argv_pointer,
            args,
            raw_working_directory: Some(raw_dir),
            raw_args,
            padding: [pad0, pad1],
            trailing: rest.to_vec(),
        })
    }

    /// 编码为检查点字节，缺少换行的参数会补上换行
    pub fn encode(&self) -> HashfleetResult<Vec<u8>> {
        let dir = self.encode_working_directory()?;

        let mut out = Vec::with_capacity(HEADER_LEN + self.args.iter().map(|a| a.len() + 1).sum::<usize>());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&dir);
        out.extend_from_slice(&self.dictionary_position.to_le_bytes());
        out.extend_from_slice(&self.masks_position.to_le_bytes());
        out.extend_from_slice(&self.padding[0]);
        out.extend_from_slice(&self.words_position.to_le_bytes());
        out.extend_from_slice(&self.arg_count.to_le_bytes());
        out.extend_from_slice(&self.padding[1]);
        out.extend_from_slice(&self.argv_pointer.to_le_bytes());

        for (i, arg) in self.args.iter().enumerate() {
            match self.raw_args.get(i) {
                Some(raw) if String::from_utf8_lossy(raw) == arg.as_str() => {
                    out.extend_from_slice(raw);
                    out.push(b'\n');
                }
                _ => {
                    out.extend_from_slice(arg.as_bytes());
                    if !arg.ends_with('\n') {
                        out.push(b'\n');
                    }
                }
            }
        }
        out.extend_from_slice(&self.trailing);

        Ok(out)
    }

    pub async fn read_file(path: &Path) -> HashfleetResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Self::decode(&bytes)
    }

    pub async fn write_file(&self, path: &Path) -> HashfleetResult<()> {
        tokio::fs::write(path, self.encode()?).await?;
        Ok(())
    }

    fn encode_working_directory(&self) -> HashfleetResult<[u8; WORKING_DIR_LEN]> {
        // 目录未被修改时沿用原始缓冲区，保留 NUL 之后的字节
        if let Some(raw) = &self.raw_working_directory {
            let end = raw.iter().position(|b| *b == 0).unwrap_or(WORKING_DIR_LEN);
            if String::from_utf8_lossy(&raw[..end]) == self.working_directory.as_str() {
                return Ok(*raw);
            }
        }

        let bytes = self.working_directory.as_bytes();
        if bytes.len() > WORKING_DIR_LEN {
            return Err(HashfleetError::Checkpoint(format!(
                "工作目录超过 {} 字节: {}",
                WORKING_DIR_LEN,
                self.working_directory
            )));
        }
        let mut buf = [0u8; WORKING_DIR_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }
}
