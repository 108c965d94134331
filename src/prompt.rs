//! Line-oriented prompts for the interactive front end.
//!
//! Every question is asked again until the answer parses; running out of input
//! is reported as an [`OwlError::InputError`].

use std::fmt;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

use kornia_image::Image;

use crate::crop::{CropRect, try_crop};
use crate::detection::parse_queries;
use crate::error::OwlError;
use crate::loader::{MODELS, ModelKind};
use crate::selection::SelectionState;

/// The two detection modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Free-text queries.
    Text,
    /// A reference crop of an exemplar object.
    Image,
}

impl FromStr for TaskKind {
    type Err = OwlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "text" => Ok(TaskKind::Text),
            "2" | "image" => Ok(TaskKind::Image),
            other => Err(OwlError::InputError(format!("Invalid task: {other}"))),
        }
    }
}

impl TryFrom<String> for TaskKind {
    type Error = OwlError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Text => write!(f, "text"),
            TaskKind::Image => write!(f, "image"),
        }
    }
}

/// Asks questions on `output` and reads answers from `input`.
pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    /// Wrap an input and an output stream, e.g. locked stdin and stdout.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Give back the wrapped streams.
    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }

    /// Print a line.
    pub fn say(&mut self, message: impl fmt::Display) -> Result<(), OwlError> {
        writeln!(self.output, "{message}")?;
        Ok(())
    }

    fn ask(&mut self, question: &str) -> Result<String, OwlError> {
        write!(self.output, "{question}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(OwlError::InputError("end of input".to_string()));
        }
        Ok(line.trim().to_string())
    }

    fn ask_until<T>(
        &mut self,
        question: &str,
        mut parse: impl FnMut(&str) -> Result<T, OwlError>,
    ) -> Result<T, OwlError> {
        loop {
            let answer = self.ask(question)?;
            match parse(&answer) {
                Ok(value) => return Ok(value),
                Err(err) => self.say(format!("{err}. Please try again."))?,
            }
        }
    }

    /// Ask which model to load.
    pub fn choose_model(&mut self) -> Result<ModelKind, OwlError> {
        let mut question = String::from("Choose a model:\n");
        for model in MODELS.iter() {
            question.push_str(&format!("{}. {}\n", model.choice, model.display_name));
        }
        question.push_str("Enter 1 or 2: ");

        let kind = self.ask_until(&question, |answer| {
            let choice = answer
                .parse::<u32>()
                .map_err(|_| OwlError::InputError("please enter a valid integer".to_string()))?;
            ModelKind::from_choice(choice)
                .ok_or_else(|| OwlError::InputError("please select 1 or 2".to_string()))
        })?;
        self.say(format!("---| {kind} model chosen |---"))?;
        Ok(kind)
    }

    /// Ask for the detection mode.
    pub fn choose_task(&mut self) -> Result<TaskKind, OwlError> {
        self.ask_until(
            "Choose a task:\n1. Text-based detection\n2. Image-based detection\nEnter 1 or 2: ",
            TaskKind::from_str,
        )
    }

    /// Ask for comma separated text queries until at least one is given.
    pub fn read_queries(&mut self) -> Result<Vec<String>, OwlError> {
        self.ask_until("Enter queries, separated by commas: ", parse_queries)
    }

    /// Ask for the path of an existing file.
    pub fn read_path(&mut self, question: &str) -> Result<PathBuf, OwlError> {
        self.ask_until(question, |answer| {
            let path = PathBuf::from(answer);
            if path.is_file() {
                Ok(path)
            } else {
                Err(OwlError::InputError(format!("no file at {answer:?}")))
            }
        })
    }

    /// Ask for the two corners of a reference crop and record them in `state`.
    ///
    /// The accepted selection is returned and stays available through
    /// [`SelectionState::rect`].
    pub fn read_selection(&mut self, state: &mut SelectionState) -> Result<CropRect, OwlError> {
        let (width, height) = state.image_size();
        let question =
            format!("Select the reference object in the {width}x{height} image as x1,y1,x2,y2: ");
        self.ask_until(&question, |answer| {
            let corners = answer
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| OwlError::InputError(format!("malformed corners: {e}")))?;
            let [x1, y1, x2, y2] = corners[..] else {
                return Err(OwlError::InputError("expected 4 values".to_string()));
            };
            state.reset();
            state.press(x1, y1);
            state.release(x2, y2).ok_or_else(|| {
                OwlError::InputError("selection is too small or outside the image".to_string())
            })
        })
    }

    /// Crop the exemplar out of `reference`, starting from `initial` when given.
    ///
    /// A failed crop is reported and a new selection is asked for.
    pub fn crop_reference(
        &mut self,
        reference: &Image<u8, 3>,
        initial: Option<CropRect>,
        state: &mut SelectionState,
    ) -> Result<Image<u8, 3>, OwlError> {
        let mut rect = match initial {
            Some(rect) => rect,
            None => self.read_selection(state)?,
        };
        loop {
            match try_crop(reference, rect) {
                Ok(exemplar) => {
                    tracing::info!(
                        "reference crop {rect} is {}x{}",
                        exemplar.width(),
                        exemplar.height()
                    );
                    return Ok(exemplar);
                }
                Err(err) => {
                    self.say(format!("{err}. Please select again."))?;
                    rect = self.read_selection(state)?;
                }
            }
        }
    }
}
