//! Debian control paragraphs.

use super::PackageError;

/// One control paragraph, keeping field order. Field names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFile {
  fields: Vec<(String, String)>,
}

impl ControlFile {
  /// Parse the first paragraph of a control file.
  ///
  /// Continuation lines (leading space or tab) extend the previous field;
  /// `#` comment lines are ignored.
  pub fn parse(text: &str) -> Result<Self, PackageError> {
    let mut fields: Vec<(String, String)> = Vec::new();

    for (number, line) in text.lines().enumerate() {
      if line.starts_with('#') {
        continue;
      }
      if line.trim().is_empty() {
        if fields.is_empty() {
          continue;
        }
        break;
      }
      if line.starts_with(' ') || line.starts_with('\t') {
        let Some((_, value)) = fields.last_mut() else {
          return Err(PackageError::InvalidControl {
            line: number + 1,
            content: line.to_string(),
          });
        };
        value.push('\n');
        value.push_str(line);
        continue;
      }
      let Some((name, value)) = line.split_once(':') else {
        return Err(PackageError::InvalidControl {
          line: number + 1,
          content: line.to_string(),
        });
      };
      fields.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Self { fields })
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .fields
      .iter()
      .find(|(field, _)| field.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }

  /// Set a field, replacing an existing one in place. Multi-line values are folded.
  pub fn set(&mut self, name: &str, value: &str) {
    let value = fold(value);
    match self.fields.iter_mut().find(|(field, _)| field.eq_ignore_ascii_case(name)) {
      Some((_, existing)) => *existing = value,
      None => self.fields.push((name.to_string(), value)),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
  }

  pub fn len(&self) -> usize {
    self.fields.len()
  }

  pub fn is_empty(&self) -> bool {
    self.fields.is_empty()
  }

  pub fn render(&self) -> String {
    let mut out = String::new();
    for (name, value) in &self.fields {
      out.push_str(name);
      out.push_str(": ");
      out.push_str(value);
      out.push('\n');
    }
    out
  }
}

/// Fold a multi-line value into control syntax: continuation lines are
/// indented by one space and blank lines become ` .`.
fn fold(value: &str) -> String {
  if !value.contains('\n') {
    return value.trim().to_string();
  }
  value
    .trim_end()
    .lines()
    .enumerate()
    .map(|(i, line)| {
      if i == 0 {
        line.trim().to_string()
      } else if line.trim().is_empty() || line.trim() == "." {
        " .".to_string()
      } else if line.starts_with(' ') || line.starts_with('\t') {
        line.to_string()
      } else {
        format!(" {}", line)
      }
    })
    .collect::<Vec<_>>()
    .join("\n")
}
