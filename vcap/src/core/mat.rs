use std::fmt;

/// OpenCV-like Matrix structure.
/// Owns its data (Vec<u8>) and supports strided memory layout.
#[derive(Clone, PartialEq, Eq)]
pub struct Mat {
    pub data: Vec<u8>,
    pub rows: i32,
    pub cols: i32,
    /// 每一行占用的字节数 (Stride)
    /// 对于 Packed 图像，step = cols * channels
    pub step: usize,
    pub channels: u8,
}

impl Mat {
    pub fn new(rows: i32, cols: i32, channels: u8) -> Self {
        let step = (cols.max(0) as usize) * channels as usize;
        let size = (rows.max(0) as usize) * step;
        Self {
            data: vec![0; size],
            rows,
            cols,
            step,
            channels,
        }
    }

    /// 创建一个空的 Mat (通常用于作为输出 buffer)
    pub fn empty() -> Self {
        Self {
            data: vec![],
            rows: 0,
            cols: 0,
            step: 0,
            channels: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.rows == 0 || self.cols == 0
    }

    /// 尺寸不符时重新分配，否则复用已有内存
    pub fn ensure(&mut self, rows: i32, cols: i32, channels: u8) {
        if self.rows != rows || self.cols != cols || self.channels != channels {
            *self = Mat::new(rows, cols, channels);
        }
    }

    /// 获取像素数据的切片 (不含行尾 Padding)
    pub fn row_bytes(&self, row: i32) -> &[u8] {
        let start = (row as usize) * self.step;
        let end = start + (self.cols as usize * self.channels as usize);
        &self.data[start..end]
    }

    pub fn row_bytes_mut(&mut self, row: i32) -> &mut [u8] {
        let start = (row as usize) * self.step;
        let end = start + (self.cols as usize * self.channels as usize);
        &mut self.data[start..end]
    }

    /// (row, col) 处的像素
    pub fn at(&self, row: i32, col: i32) -> &[u8] {
        let ch = self.channels as usize;
        let offset = col as usize * ch;
        &self.row_bytes(row)[offset..offset + ch]
    }
}

impl fmt::Debug for Mat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mat")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("channels", &self.channels)
            .field("step", &self.step)
            .finish()
    }
}
