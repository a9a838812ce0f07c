use sea_query::Value;

/// Output of a dialect compiler: a command template and its positional parameters.
///
/// `parameters[i]` binds to placeholder `$i+1`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCommand {
    pub command: String,
    pub parameters: Vec<Value>,
}

impl GeneratedCommand {
    pub fn new(command: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            parameters,
        }
    }

    /// A command with no parameters.
    pub fn text(command: impl Into<String>) -> Self {
        Self::new(command, Vec::new())
    }

    /// Number of `$n` placeholders outside quoted literals and identifiers.
    pub fn placeholder_count(&self) -> usize {
        let bytes = self.command.as_bytes();
        let mut count = 0;
        let mut quote: Option<u8> = None;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'\'' || b == b'"' => quote = Some(b),
                None if b == b'$' => {
                    let digits = bytes[i + 1..]
                        .iter()
                        .take_while(|d| d.is_ascii_digit())
                        .count();
                    if digits > 0 {
                        count += 1;
                        i += digits;
                    }
                }
                None => {}
            }
            i += 1;
        }
        count
    }
}
