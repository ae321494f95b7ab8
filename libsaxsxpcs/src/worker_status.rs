/// Color of a worker's progress bar, one per processing stage
#[derive(Debug, Clone, Default, PartialEq)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    GREEN,
}

/// Progress message sent from a worker thread to the front end
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    pub progress: f32,
    pub file_index: usize,
    pub worker_id: usize,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, file_index: usize, worker_id: usize, color: BarColor) -> Self {
        Self {
            progress,
            file_index,
            worker_id,
            color,
        }
    }
}
