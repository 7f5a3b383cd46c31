/// 环形缓冲区模块
///
/// 每个转发方向独占一个 `RingBuffer`：读端把数据写进生产窗口，写端从消费窗口
/// 取出数据发往对端。窗口永远是连续的一段内存，不会跨越底层数组末尾。

/// 固定容量的环形字节缓冲区
///
/// 内部用累计偏移 `low`/`high` 记录读写位置，而不是直接保存取模后的下标，
/// 这样满和空可以直接由 `high - low` 区分。
pub struct RingBuffer {
    data: Box<[u8]>,
    low: u64,
    high: u64,
}

impl RingBuffer {
    /// 创建指定容量的缓冲区
    ///
    /// # Panics
    ///
    /// 容量为 0 时 panic。
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            low: 0,
            high: 0,
        }
    }

    /// 缓冲区容量
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 当前已缓存的字节数
    pub fn len(&self) -> usize {
        (self.high - self.low) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.low == self.high
    }

    fn cap(&self) -> u64 {
        self.data.len() as u64
    }

    /// 容量不变式：`low <= high <= low + cap`
    ///
    /// 一旦被破坏说明调用方提交了超过窗口长度的字节数，继续运行只会悄悄
    /// 弄乱数据，所以直接 panic。
    fn check_invariant(&self) {
        assert!(
            self.low <= self.high && self.high <= self.low + self.cap(),
            "ring buffer corrupted: [{} {}) cap={}",
            self.low,
            self.high,
            self.cap()
        );
    }

    /// 是否还有空间可写
    pub fn producible(&self) -> bool {
        self.high < self.low + self.cap()
    }

    /// 是否还有数据可读
    pub fn consumable(&self) -> bool {
        self.low < self.high
    }

    fn producer_range(&self) -> (usize, usize) {
        let cap = self.cap();
        let start = self.high % cap;
        // 写到下一个 cap 边界为止，且不能超过 low + cap
        let boundary = (self.high / cap + 1) * cap;
        let end = boundary.min(self.low + cap);
        let len = end - self.high;
        (start as usize, (start + len) as usize)
    }

    fn consumer_range(&self) -> (usize, usize) {
        let cap = self.cap();
        let start = self.low % cap;
        let end = if self.low / cap != self.high / cap {
            cap
        } else {
            self.high % cap
        };
        (start as usize, end as usize)
    }

    /// 生产窗口：从 `high mod cap` 开始的连续空闲区域
    pub fn producer_buffer(&mut self) -> &mut [u8] {
        self.check_invariant();
        let (start, end) = self.producer_range();
        &mut self.data[start..end]
    }

    /// 提交已写入生产窗口的 `n` 个字节，返回提交后是否仍可写
    pub fn produce(&mut self, n: usize) -> bool {
        let (start, end) = self.producer_range();
        assert!(
            n <= end - start,
            "produce({}) exceeds producer window of {} bytes",
            n,
            end - start
        );
        self.high += n as u64;
        self.check_invariant();
        self.producible()
    }

    /// 消费窗口：从 `low mod cap` 开始的连续已填充区域
    pub fn consumer_buffer(&self) -> &[u8] {
        self.check_invariant();
        let (start, end) = self.consumer_range();
        &self.data[start..end]
    }

    /// 提交已从消费窗口取走的 `n` 个字节，返回提交后是否仍可读
    pub fn consume(&mut self, n: usize) -> bool {
        let (start, end) = self.consumer_range();
        assert!(
            n <= end - start,
            "consume({}) exceeds consumer window of {} bytes",
            n,
            end - start
        );
        self.low += n as u64;
        self.check_invariant();

        if self.low == self.high {
            self.low = 0;
            self.high = 0;
        } else if self.low >= self.cap() {
            // 两个计数器同时平移整数圈，取模位置和圈数关系都不变
            let shift = self.low - self.low % self.cap();
            self.low -= shift;
            self.high -= shift;
        }
        self.consumable()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("low", &self.low)
            .field("high", &self.high)
            .field("cap", &self.cap())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn assert_occupancy(rb: &RingBuffer) {
        assert!(rb.low <= rb.high);
        assert!(rb.high - rb.low <= rb.cap());
        assert!(rb.low < rb.cap() || rb.low == 0);
    }

    fn shuttle(capacity: usize, total: usize) {
        let mut rng = rand::rng();
        let mut src = vec![0u8; total];
        rng.fill(&mut src[..]);
        let mut dst = Vec::with_capacity(total);
        let mut rb = RingBuffer::new(capacity);

        let mut written = 0;
        while dst.len() < total {
            let window = rb.producer_buffer();
            let n = window
                .len()
                .min(total - written)
                .min(rng.random_range(0..=capacity));
            if n > 0 {
                window[..n].copy_from_slice(&src[written..written + n]);
                rb.produce(n);
                written += n;
            }
            assert_occupancy(&rb);

            let window = rb.consumer_buffer();
            let m = window.len().min(rng.random_range(0..=capacity));
            if m > 0 {
                dst.extend_from_slice(&window[..m]);
                rb.consume(m);
            }
            assert_occupancy(&rb);
        }

        assert_eq!(src, dst);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_random_round_trip() {
        shuttle(64, 64 * 1024);
    }

    #[test]
    fn test_round_trip_odd_sizes() {
        shuttle(7, 1000);
        shuttle(1, 33);
        shuttle(4096, 4096 * 3 + 17);
    }

    #[test]
    fn test_empty_buffer_windows() {
        let mut rb = RingBuffer::new(8);
        assert!(rb.producible());
        assert!(!rb.consumable());
        assert_eq!(rb.producer_buffer().len(), 8);
        assert!(rb.consumer_buffer().is_empty());
    }

    #[test]
    fn test_windows_do_not_wrap() {
        let mut rb = RingBuffer::new(8);
        rb.producer_buffer()[..6].copy_from_slice(b"abcdef");
        assert!(rb.produce(6));
        assert!(rb.consume(4));
        assert_eq!(rb.consumer_buffer(), b"ef");

        // 只能写到数组末尾，剩下的空闲区需要第二次调用
        assert_eq!(rb.producer_buffer().len(), 2);
        rb.producer_buffer().copy_from_slice(b"gh");
        assert!(rb.produce(2));
        assert_eq!(rb.producer_buffer().len(), 4);
        rb.producer_buffer().copy_from_slice(b"ijkl");
        assert!(!rb.produce(4));
        assert!(!rb.producible());
        assert!(rb.producer_buffer().is_empty());

        assert_eq!(rb.consumer_buffer(), b"efgh");
        assert!(rb.consume(4));
        assert_eq!(rb.consumer_buffer(), b"ijkl");
        assert!(!rb.consume(4));
    }

    #[test]
    fn test_counters_reset_when_drained() {
        let mut rb = RingBuffer::new(8);
        rb.produce(5);
        rb.consume(5);
        assert_eq!((rb.low, rb.high), (0, 0));
        assert_eq!(rb.producer_buffer().len(), 8);
    }

    #[test]
    fn test_counters_stay_bounded_when_never_drained() {
        let mut rb = RingBuffer::new(8);
        rb.produce(8);
        for _ in 0..1000 {
            let n = rb.consumer_buffer().len().min(3);
            rb.consume(n);
            let m = rb.producer_buffer().len();
            rb.produce(m);
            assert!(rb.high < 3 * rb.cap());
            assert_occupancy(&rb);
        }
    }

    #[test]
    fn test_partial_commit() {
        let mut rb = RingBuffer::new(16);
        assert_eq!(rb.producer_buffer().len(), 16);
        rb.producer_buffer()[..3].copy_from_slice(b"xyz");
        rb.produce(3);
        assert_eq!(rb.len(), 3);
        rb.consume(1);
        assert_eq!(rb.consumer_buffer(), b"yz");
        assert_eq!(rb.len(), 2);
    }

    #[test]
    #[should_panic(expected = "exceeds producer window")]
    fn test_overproduce_panics() {
        let mut rb = RingBuffer::new(4);
        rb.produce(5);
    }

    #[test]
    #[should_panic(expected = "exceeds consumer window")]
    fn test_overconsume_panics() {
        let mut rb = RingBuffer::new(4);
        rb.produce(2);
        rb.consume(3);
    }
}
