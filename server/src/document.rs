//! Payment documents for fines.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use toll_shared::messages::{PaymentCode, PaymentCodeEncoder};
use toll_shared::model::FineReport;

use crate::error::EngineError;

pub const CONTENT_TYPE: &str = "application/pdf";

pub fn attachment_filename(fine_id: i64) -> String {
    format!("bollettino_{fine_id}.pdf")
}

/// Turns a fine into the downloadable payment document. The payment code is
/// handed over as `payment_code_text`; drawing it as a QR image belongs to
/// whichever renderer is installed in place of `PdfRenderer`.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, report: &FineReport) -> Result<Vec<u8>, EngineError>;
}

pub fn payment_code_text(report: &FineReport) -> Result<String, EngineError> {
    let mut buffer = BytesMut::new();
    PaymentCodeEncoder {}
        .encode(PaymentCode::from(report), &mut buffer)
        .map_err(|e| EngineError::Internal(format!("cannot encode payment code: {e}")))?;
    String::from_utf8(buffer.to_vec())
        .map_err(|e| EngineError::Internal(format!("cannot encode payment code: {e}")))
}

/// Single A4 page in Helvetica with the fine details and the payment code
/// as text. Drawing the code as a QR image is left to a dedicated renderer.
pub struct PdfRenderer;

impl PdfRenderer {
    fn lines(report: &FineReport) -> Result<Vec<String>, EngineError> {
        Ok(vec![
            String::from("Bollettino di pagamento"),
            String::new(),
            format!("Multa n. {}", report.id),
            format!("Targa: {}", report.transit.plate),
            format!("Importo: {:.2} EUR", report.amount),
            format!(
                "Tratta: {} km {} - {} km {} ({} km)",
                report.route.entry_gate.highway,
                report.route.entry_gate.km,
                report.route.exit_gate.highway,
                report.route.exit_gate.km,
                report.route.distance
            ),
            format!(
                "Transito: {} - {}",
                report.transit.entry_at.format("%d/%m/%Y %H:%M:%S"),
                report.transit.exit_at.format("%d/%m/%Y %H:%M:%S")
            ),
            format!("Velocita media: {} km/h", report.transit.average_speed),
            String::new(),
            format!("Codice di pagamento: {}", payment_code_text(report)?),
        ])
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                escaped.push('\\');
                escaped.push(c);
            }
            c if c.is_ascii() => escaped.push(c),
            _ => escaped.push('?'),
        }
    }
    escaped
}

fn write_pdf(lines: &[String]) -> Vec<u8> {
    let mut content = String::from("BT\n/F1 12 Tf\n72 770 Td\n16 TL\n");
    for line in lines {
        content.push_str(&format!("({}) Tj\nT*\n", escape(line)));
    }
    content.push_str("ET");

    let objects = [
        String::from("<< /Type /Catalog /Pages 2 0 R >>"),
        String::from("<< /Type /Pages /Kids [3 0 R] /Count 1 >>"),
        String::from(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] \
             /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>",
        ),
        format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
        String::from("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>"),
    ];

    let mut pdf = BytesMut::new();
    pdf.put_slice(b"%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, object) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.put_slice(format!("{} 0 obj\n{}\nendobj\n", index + 1, object).as_bytes());
    }

    let xref = pdf.len();
    pdf.put_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in offsets {
        pdf.put_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.put_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf.to_vec()
}

impl DocumentRenderer for PdfRenderer {
    fn render(&self, report: &FineReport) -> Result<Vec<u8>, EngineError> {
        Ok(write_pdf(&Self::lines(report)?))
    }
}
