// Terminal response classification
// SPDX-License-Identifier: MPL-2.0
//
/// Terminal line of a command exchange. Every command is acknowledged by
/// exactly one of these; pairing with the issuing caller is by order alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Fail(String),
    Result(String),
}

impl Response {
    /// Classify a line already known not to be an echo or an event start.
    pub fn classify(line: &str) -> Response {
        if line.starts_with("OK") {
            Response::Ok
        } else if line.starts_with("FAIL") {
            let code = line.split_whitespace().nth(1).unwrap_or_default();
            Response::Fail(code.to_string())
        } else {
            Response::Result(line.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_terminal_lines() {
        assert_eq!(Response::classify("OK"), Response::Ok);
        assert_eq!(Response::classify("FAIL ER04"), Response::Fail("ER04".to_string()));
        assert_eq!(
            Response::classify("FE80:0000:0000:0000:021D:1290:1234:5678"),
            Response::Result("FE80:0000:0000:0000:021D:1290:1234:5678".to_string())
        );
    }

    #[test]
    fn classify_fail_without_code() {
        assert_eq!(Response::classify("FAIL"), Response::Fail(String::new()));
    }
}
