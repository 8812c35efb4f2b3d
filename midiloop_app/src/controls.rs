//! Event-level control surface. Hardware buttons and encoders map to these
//! events; the line-based stdin reader maps keys to the same events so the
//! whole app can be driven from a terminal.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    Play,
    Stop,
    Record,
    Clear,
    Ok,
    Scope,
    Shift,
    /// Numbered buttons, 1-based.
    Number(u8),
    /// Param encoder turn.
    ParamTurn(i32),
    /// Value encoder turn.
    ValueTurn(i32),
}

pub const HELP: &str = "\
keys: p=play s=stop r=record c=clear o=ok g=scope !=shift 1-4=track \
[ ]=param -/+=value q=quit";

/// Map one line of input to control events, one per key.
pub fn parse_line(line: &str) -> Vec<ControlEvent> {
    line.trim().chars().filter_map(event_for_key).collect()
}

fn event_for_key(key: char) -> Option<ControlEvent> {
    match key {
        'p' | ' ' => Some(ControlEvent::Play),
        's' => Some(ControlEvent::Stop),
        'r' => Some(ControlEvent::Record),
        'c' => Some(ControlEvent::Clear),
        'o' => Some(ControlEvent::Ok),
        'g' => Some(ControlEvent::Scope),
        '!' => Some(ControlEvent::Shift),
        '1'..='4' => Some(ControlEvent::Number(key as u8 - b'0')),
        '[' => Some(ControlEvent::ParamTurn(-1)),
        ']' => Some(ControlEvent::ParamTurn(1)),
        '-' => Some(ControlEvent::ValueTurn(-1)),
        '+' | '=' => Some(ControlEvent::ValueTurn(1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_transport_keys() {
        assert_eq!(
            vec![ControlEvent::Play, ControlEvent::Stop, ControlEvent::Record],
            parse_line("psr")
        );
    }

    #[test]
    fn maps_numbers_and_encoders() {
        assert_eq!(
            vec![
                ControlEvent::Number(3),
                ControlEvent::ParamTurn(1),
                ControlEvent::ValueTurn(-1),
            ],
            parse_line("3]-")
        );
    }

    #[test]
    fn shift_prefixes_pass_through() {
        assert_eq!(
            vec![ControlEvent::Shift, ControlEvent::Number(2)],
            parse_line("!2")
        );
    }

    #[test]
    fn unknown_keys_are_dropped() {
        assert!(parse_line("xyz??").is_empty());
    }
}
