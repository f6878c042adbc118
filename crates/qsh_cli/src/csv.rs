use std::borrow::Cow;
use std::io::{self, Write};

/// CSV dialect used for result output.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub null_as: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            null_as: String::new(),
        }
    }
}

/// Quote a single CSV field value according to the given options.
/// Quotes if the value contains the delimiter, quote char, newline, or carriage return.
pub fn quote_field<'a>(value: &'a str, opts: &CsvOptions) -> Cow<'a, str> {
    let q = opts.quote as char;
    let d = opts.delimiter as char;
    let needs_quoting =
        value.contains(d) || value.contains(q) || value.contains('\n') || value.contains('\r');

    if needs_quoting {
        let escaped = value.replace(q, &format!("{}{}", q, q));
        Cow::Owned(format!("{}{}{}", q, escaped, q))
    } else {
        Cow::Borrowed(value)
    }
}

/// Write one record terminated by `\n`.
pub fn write_record<W: Write + ?Sized>(
    out: &mut W,
    fields: &[String],
    opts: &CsvOptions,
) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(&[opts.delimiter])?;
        }
        out.write_all(quote_field(field, opts).as_bytes())?;
    }
    out.write_all(b"\n")
}
