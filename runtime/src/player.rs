//! Headless frame loop over a parsed movie.

use std::io::Write;
use std::rc::Rc;

use movie::Movie;

use crate::error::Result;
use crate::interpreter::Vm;

/// Guard against movies that navigate forever.
const FRAME_ITERATION_CAP: usize = 10_000;

/// Drives a [`Vm`] through a movie's frames. The trace sink is the only
/// stdout-visible output; lifecycle diagnostics go through `log`.
pub struct Player<W: Write> {
    vm: Vm<W>,
    frame_count: usize,
}

impl<W: Write> Player<W> {
    pub fn new(movie: &Movie, sink: W) -> Self {
        Self::build(movie, Vm::new(sink))
    }

    /// Like [`Player::new`] but with a fixed random seed.
    pub fn with_seed(movie: &Movie, sink: W, seed: u32) -> Self {
        Self::build(movie, Vm::with_seed(sink, seed))
    }

    fn build(movie: &Movie, mut vm: Vm<W>) -> Self {
        for (index, frame) in movie.frames().into_iter().enumerate() {
            if let Some(label) = frame.label {
                vm.labels.insert(label, index);
            }
            vm.frames.push(
                frame
                    .scripts
                    .iter()
                    .map(|script| Rc::from(script.as_slice()))
                    .collect(),
            );
        }
        let frame_count = vm.frames.len();
        Self { vm, frame_count }
    }

    /// Runs the movie until playback ends: past the last frame, stopped by a
    /// script, or at the iteration cap.
    pub fn run(&mut self) -> Result<()> {
        for _ in 0..FRAME_ITERATION_CAP {
            if self.vm.current_frame >= self.frame_count {
                return Ok(());
            }
            let scripts = self.vm.frames[self.vm.current_frame].clone();
            for script in scripts {
                self.vm.run_script(script)?;
            }
            // A script-forced target wins over the playing flag.
            if let Some(target) = self.vm.pending_frame.take() {
                self.vm.current_frame = target;
            } else if self.vm.playing {
                self.vm.current_frame += 1;
                if self.vm.current_frame >= self.frame_count {
                    return Ok(());
                }
            } else {
                // Stopped with nowhere to go; a headless movie idles out here.
                return Ok(());
            }
        }
        log::warn!("giving up after {FRAME_ITERATION_CAP} frame iterations");
        Ok(())
    }

    pub fn into_sink(self) -> W {
        self.vm.into_sink()
    }
}
