// Parsing of grading completions.
//
// Providers are asked for a small JSON object but sometimes answer with
// labelled lines instead:
//
//   GRADE: B+
//   CONFIDENCE: 72
//   REASONING: ...
//
// Both shapes are accepted. Anything else is an invalid response.

use serde::Deserialize;
use serde_json::Value;
use startsit_core::model::Grade;

use crate::client::GradeResult;

#[derive(Debug, Deserialize)]
struct RawGrade {
    grade: String,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse a completion into a `GradeResult`, returning a short description of
/// what was wrong on failure.
pub fn parse_grade_response(text: &str) -> Result<GradeResult, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty completion".to_string());
    }
    if let Some(result) = parse_json(text)? {
        return Ok(result);
    }
    parse_labelled_lines(text)
}

/// `Ok(None)` means no JSON object was present; a malformed object that did
/// parse is an error.
fn parse_json(text: &str) -> Result<Option<GradeResult>, String> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Ok(None);
    };
    if end <= start {
        return Ok(None);
    }
    let Ok(raw) = serde_json::from_str::<RawGrade>(&text[start..=end]) else {
        return Ok(None);
    };

    let grade = Grade::parse(&raw.grade).ok_or_else(|| format!("unknown grade {:?}", raw.grade))?;
    let confidence = match raw.confidence {
        Some(Value::Number(n)) => n
            .as_f64()
            .map(clamp_confidence)
            .ok_or_else(|| "confidence is not a number".to_string())?,
        Some(Value::String(s)) => parse_confidence(&s)?,
        Some(other) => return Err(format!("confidence has unexpected type: {other}")),
        None => return Err("missing confidence".to_string()),
    };
    let reasoning = raw.reasoning.unwrap_or_default().trim().to_string();
    if reasoning.is_empty() {
        return Err("missing reasoning".to_string());
    }

    Ok(Some(GradeResult {
        grade,
        confidence,
        reasoning,
    }))
}

fn parse_labelled_lines(text: &str) -> Result<GradeResult, String> {
    let mut grade = None;
    let mut confidence = None;
    let mut reasoning: Option<String> = None;

    for line in text.lines() {
        let cleaned = line
            .trim()
            .trim_start_matches(|c: char| matches!(c, '*' | '#' | '-' | ' '));
        if let Some(value) = strip_label(cleaned, "GRADE") {
            grade = Some(Grade::parse(value).ok_or_else(|| format!("unknown grade {value:?}"))?);
        } else if let Some(value) = strip_label(cleaned, "CONFIDENCE") {
            confidence = Some(parse_confidence(value)?);
        } else if let Some(value) = strip_label(cleaned, "REASONING") {
            reasoning = Some(value.to_string());
        } else if let Some(r) = reasoning.as_mut() {
            // Reasoning runs to the end of the completion.
            if !r.is_empty() {
                r.push('\n');
            }
            r.push_str(line.trim());
        }
    }

    let grade = grade.ok_or_else(|| "no GRADE line".to_string())?;
    let confidence = confidence.ok_or_else(|| "no CONFIDENCE line".to_string())?;
    let reasoning = reasoning
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| "no REASONING line".to_string())?;

    Ok(GradeResult {
        grade,
        confidence,
        reasoning,
    })
}

/// Case-insensitive `LABEL:` prefix match, tolerating markdown bold markers
/// around the label.
fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if !head.eq_ignore_ascii_case(label) {
        return None;
    }
    let rest = line[label.len()..].trim_start_matches('*');
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_start_matches('*').trim())
}

/// Accepts "72", "72%", "72/100" and "0.72".
fn parse_confidence(value: &str) -> Result<u8, String> {
    let cleaned = value
        .trim()
        .trim_end_matches('%')
        .trim_end_matches("/100")
        .trim();
    let n: f64 = cleaned
        .parse()
        .map_err(|_| format!("unparseable confidence {value:?}"))?;
    if !n.is_finite() {
        return Err(format!("unparseable confidence {value:?}"));
    }
    Ok(clamp_confidence(n))
}

fn clamp_confidence(n: f64) -> u8 {
    let scaled = if n > 0.0 && n < 1.0 { n * 100.0 } else { n };
    scaled.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object() {
        let r = parse_grade_response(
            r#"{"grade": "A", "confidence": 88, "reasoning": "Elite target share."}"#,
        )
        .unwrap();
        assert_eq!(r.grade, Grade::A);
        assert_eq!(r.confidence, 88);
        assert_eq!(r.reasoning, "Elite target share.");
    }

    #[test]
    fn json_wrapped_in_prose_and_fences() {
        let text = "Here is my assessment:\n```json\n{\"grade\": \"c+\", \"confidence\": \"55%\", \"reasoning\": \"Tough corner.\"}\n```";
        let r = parse_grade_response(text).unwrap();
        assert_eq!(r.grade, Grade::CPlus);
        assert_eq!(r.confidence, 55);
    }

    #[test]
    fn json_with_unknown_grade_is_error() {
        let text = r#"{"grade": "Z", "confidence": 50, "reasoning": "x"}"#;
        let err = parse_grade_response(text).unwrap_err();
        assert!(err.contains("unknown grade"));
    }

    #[test]
    fn json_without_reasoning_is_error() {
        assert!(parse_grade_response(r#"{"grade": "B", "confidence": 50}"#).is_err());
    }

    #[test]
    fn labelled_lines() {
        let text = "GRADE: B-\nCONFIDENCE: 61\nREASONING: Rain expected.\nWind is light.";
        let r = parse_grade_response(text).unwrap();
        assert_eq!(r.grade, Grade::BMinus);
        assert_eq!(r.confidence, 61);
        assert_eq!(r.reasoning, "Rain expected.\nWind is light.");
    }

    #[test]
    fn labelled_lines_with_markdown() {
        let text = "**Grade:** D\n**Confidence:** 30/100\n**Reasoning:** Top-3 run defense.";
        let r = parse_grade_response(text).unwrap();
        assert_eq!(r.grade, Grade::D);
        assert_eq!(r.confidence, 30);
        assert_eq!(r.reasoning, "Top-3 run defense.");
    }

    #[test]
    fn fractional_confidence_is_scaled() {
        let r = parse_grade_response("GRADE: A+\nCONFIDENCE: 0.9\nREASONING: Smash spot.").unwrap();
        assert_eq!(r.confidence, 90);
    }

    #[test]
    fn confidence_is_clamped() {
        let r = parse_grade_response("GRADE: F\nCONFIDENCE: 140\nREASONING: Injured.").unwrap();
        assert_eq!(r.confidence, 100);
    }

    #[test]
    fn missing_pieces_are_errors() {
        assert!(parse_grade_response("").is_err());
        assert!(parse_grade_response("I think he is fine.").is_err());
        assert!(parse_grade_response("GRADE: B\nREASONING: ok").is_err());
        assert!(parse_grade_response("GRADE: B\nCONFIDENCE: 50").is_err());
    }
}
