use std::time::Duration;
use tracing::trace;

use crate::domain::{ChartType, DVConfig, DVError, Message};
use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &DVConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, DVError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    return Ok(self.handle_key(key, model.raw_keyevents()));
                }
                Event::Resize(width, height) => {
                    return Ok(Some(Message::Resize(width as usize, height as usize)));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn handle_key(&self, key: KeyEvent, raw: bool) -> Option<Message> {
        // While the command line is active every key goes to the inputter
        if raw {
            return Some(Message::RawKey(key));
        }
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Char('?'), _) | (KeyCode::F(1), _) => Some(Message::Help),
            (KeyCode::Esc, _) => Some(Message::Exit),
            (KeyCode::Enter, _) => Some(Message::Enter),
            (KeyCode::Right, _) | (KeyCode::Char('l'), _) | (KeyCode::Tab, _) => {
                Some(Message::NextColumn)
            }
            (KeyCode::Left, _) | (KeyCode::Char('h'), _) | (KeyCode::BackTab, _) => {
                Some(Message::PrevColumn)
            }
            (KeyCode::Char('c'), _) => Some(Message::NextChartType),
            (KeyCode::Char('b'), _) => Some(Message::SetChartType(ChartType::Bar)),
            (KeyCode::Char('H'), _) => Some(Message::SetChartType(ChartType::Histogram)),
            (KeyCode::Char('p'), _) => Some(Message::SetChartType(ChartType::Pie)),
            (KeyCode::Down, _) | (KeyCode::Char('j'), _) | (KeyCode::PageDown, _) => {
                Some(Message::NextPage)
            }
            (KeyCode::Up, _) | (KeyCode::Char('k'), _) | (KeyCode::PageUp, _) => {
                Some(Message::PrevPage)
            }
            (KeyCode::Char('g'), _) | (KeyCode::Home, _) => Some(Message::FirstPage),
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => Some(Message::LastPage),
            (KeyCode::Char('+'), _) => Some(Message::IncreasePageSize),
            (KeyCode::Char('-'), _) => Some(Message::DecreasePageSize),
            (KeyCode::Char('o'), _) => Some(Message::OpenFile),
            (KeyCode::Char(':'), _) => Some(Message::GotoColumn),
            (KeyCode::Char('y'), _) => Some(Message::CopyPage),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
