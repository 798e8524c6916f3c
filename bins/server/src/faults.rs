// ═══════════════════════════════════════════════════════════════
//  Rng
// ═══════════════════════════════════════════════════════════════

/// Xorshift64. Детерминирован при `seed != 0`; `0` — seed от часов.
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: i64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed as u64
        };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns f64 in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / ((1u64 << 53) as f64)
    }

    /// Равномерно в `[lo, hi)`; при `hi <= lo` возвращает `lo`.
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        lo + self.next_u64() % (hi - lo)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Fault points
// ═══════════════════════════════════════════════════════════════

/// Шаг producer'а, на котором можно уронить запись.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    CreateRecord,
    CreateFolder,
    CreateFile,
    StreamAborted,
    WriteChunk,
    CloseFile,
    MarkStored,
}

impl std::fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultPoint::CreateRecord => f.write_str("create_record"),
            FaultPoint::CreateFolder => f.write_str("create_folder"),
            FaultPoint::CreateFile => f.write_str("create_file"),
            FaultPoint::StreamAborted => f.write_str("stream_aborted"),
            FaultPoint::WriteChunk => f.write_str("write_chunk"),
            FaultPoint::CloseFile => f.write_str("close_file"),
            FaultPoint::MarkStored => f.write_str("mark_stored"),
        }
    }
}

/// Решает, падать ли на данном шаге.
pub trait FaultInjector: Send {
    fn should_fail(&mut self, point: FaultPoint) -> bool;
}

/// Никогда не падает.
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn should_fail(&mut self, _point: FaultPoint) -> bool {
        false
    }
}

fn p_create_record() -> f64 {
    0.01
}
fn p_create_folder() -> f64 {
    0.01
}
fn p_create_file() -> f64 {
    0.01
}
fn p_stream_aborted() -> f64 {
    0.05
}
fn p_write_chunk() -> f64 {
    0.02
}
fn p_close_file() -> f64 {
    0.01
}
fn p_mark_stored() -> f64 {
    0.1
}

/// Вероятности отказа по шагам (`[producer.faults]`).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct FaultProbabilities {
    #[serde(default = "p_create_record")]
    pub create_record: f64,
    #[serde(default = "p_create_folder")]
    pub create_folder: f64,
    #[serde(default = "p_create_file")]
    pub create_file: f64,
    /// Клиент оборвал поток; проверяется перед каждым chunk'ом.
    #[serde(default = "p_stream_aborted")]
    pub stream_aborted: f64,
    #[serde(default = "p_write_chunk")]
    pub write_chunk: f64,
    #[serde(default = "p_close_file")]
    pub close_file: f64,
    #[serde(default = "p_mark_stored")]
    pub mark_stored: f64,
}

impl Default for FaultProbabilities {
    fn default() -> Self {
        Self {
            create_record: p_create_record(),
            create_folder: p_create_folder(),
            create_file: p_create_file(),
            stream_aborted: p_stream_aborted(),
            write_chunk: p_write_chunk(),
            close_file: p_close_file(),
            mark_stored: p_mark_stored(),
        }
    }
}

impl FaultProbabilities {
    pub fn get(&self, point: FaultPoint) -> f64 {
        match point {
            FaultPoint::CreateRecord => self.create_record,
            FaultPoint::CreateFolder => self.create_folder,
            FaultPoint::CreateFile => self.create_file,
            FaultPoint::StreamAborted => self.stream_aborted,
            FaultPoint::WriteChunk => self.write_chunk,
            FaultPoint::CloseFile => self.close_file,
            FaultPoint::MarkStored => self.mark_stored,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let all = [
            ("create_record", self.create_record),
            ("create_folder", self.create_folder),
            ("create_file", self.create_file),
            ("stream_aborted", self.stream_aborted),
            ("write_chunk", self.write_chunk),
            ("close_file", self.close_file),
            ("mark_stored", self.mark_stored),
        ];
        for (name, p) in all {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("fault probability {name} = {p} is outside [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Падает с заданной вероятностью на каждом шаге.
pub struct RandomFaults {
    probabilities: FaultProbabilities,
    rng: Rng,
}

impl RandomFaults {
    pub fn new(probabilities: FaultProbabilities, seed: i64) -> Self {
        Self { probabilities, rng: Rng::new(seed) }
    }
}

impl FaultInjector for RandomFaults {
    fn should_fail(&mut self, point: FaultPoint) -> bool {
        self.rng.next_f64() < self.probabilities.get(point)
    }
}
