use std::io::Stdout;

use pbr::{ProgressBar, Units};

pub trait ProgressReporter {
    fn start(&mut self, total_bytes: usize);
    fn advance(&mut self, bytes: usize);
    fn finish(&mut self);
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&mut self, _total_bytes: usize) {}
    fn advance(&mut self, _bytes: usize) {}
    fn finish(&mut self) {}
}

pub struct ProgressBarReporter {
    pb: ProgressBar<Stdout>,
}

impl ProgressReporter for ProgressBarReporter {
    fn start(&mut self, total_bytes: usize) {
        self.pb.total = total_bytes as u64;
        self.pb.set_units(Units::Bytes);
    }

    fn advance(&mut self, bytes: usize) {
        self.pb.add(bytes as u64);
    }

    fn finish(&mut self) {
        self.pb.finish();
        // New line after progress bar
        println!();
    }
}

impl ProgressBarReporter {
    pub fn new() -> Self {
        Self {
            pb: ProgressBar::new(0),
        }
    }
}

/// A bar when `show` is set, nothing otherwise.
pub fn reporter(show: bool) -> Box<dyn ProgressReporter> {
    if show {
        Box::new(ProgressBarReporter::new())
    } else {
        Box::new(NoProgress)
    }
}
