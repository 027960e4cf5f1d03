/// Sink for user-visible progress updates, implemented by the UI layer.
pub trait ProgressSink {
    fn update(&mut self, percent: u8);
}

/// Sink that discards all updates.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&mut self, _percent: u8) {}
}

/// Sink that logs each percentage step.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn update(&mut self, percent: u8) {
        log::info!("export progress: {}%", percent);
    }
}

/// Step counter translating "N of M steps done" into a percentage.
///
/// Purely a feedback layer; it has no effect on pipeline correctness.
pub struct StepProgress {
    sink: Box<dyn ProgressSink>,
    total_steps: usize,
    completed: usize,
}

impl StepProgress {
    pub fn new(sink: Box<dyn ProgressSink>) -> Self {
        Self {
            sink,
            total_steps: 0,
            completed: 0,
        }
    }

    /// Set the expected number of steps and reset the counter.
    pub fn configure(&mut self, total_steps: usize) {
        self.total_steps = total_steps;
        self.completed = 0;
        self.sink.update(0);
    }

    /// Grow the plan when the step count is only known mid-pipeline,
    /// e.g. one archive step per downloaded scene.
    pub fn add_steps(&mut self, steps: usize) {
        self.total_steps += steps;
    }

    /// Mark one step done and publish the resulting percentage.
    pub fn advance(&mut self) -> u8 {
        self.completed += 1;
        let percent = self.percent();
        self.sink.update(percent);
        percent
    }

    fn percent(&self) -> u8 {
        // A plan of zero or one steps is always 100% after the first step.
        if self.total_steps <= 1 {
            return 100;
        }
        let raw = 100 / (self.total_steps - 1) * self.completed;
        raw.min(100) as u8
    }
}
