use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::FetchError;

/// One row of the `corpCode.xml` entity table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpCode {
    pub corp_code: String,
    pub corp_name: String,
    pub stock_code: Option<String>,
}

#[derive(Clone, Copy)]
enum Field {
    Code,
    Name,
    Stock,
}

/// Parse the `<result><list>…</list></result>` table.
pub fn parse_corp_codes(xml: &str) -> Result<Vec<CorpCode>, FetchError> {
    let mut reader = Reader::from_str(xml);
    let mut corps = Vec::new();
    let mut buf = Vec::new();
    let mut in_list = false;
    let mut field: Option<Field> = None;
    let mut current = CorpCode {
        corp_code: String::new(),
        corp_name: String::new(),
        stock_code: None,
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"list" => in_list = true,
                b"corp_code" if in_list => field = Some(Field::Code),
                b"corp_name" if in_list => field = Some(Field::Name),
                b"stock_code" if in_list => field = Some(Field::Stock),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if let Some(f) = field {
                    let text = e
                        .unescape()
                        .map_err(|err| FetchError::Transport(format!("corp code table: {}", err)))?;
                    let text = text.trim();
                    match f {
                        Field::Code => current.corp_code.push_str(text),
                        Field::Name => current.corp_name.push_str(text),
                        Field::Stock if !text.is_empty() => current.stock_code = Some(text.to_string()),
                        Field::Stock => {}
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"list" => {
                    in_list = false;
                    let done = std::mem::replace(
                        &mut current,
                        CorpCode {
                            corp_code: String::new(),
                            corp_name: String::new(),
                            stock_code: None,
                        },
                    );
                    if !done.corp_code.is_empty() {
                        corps.push(done);
                    }
                }
                b"corp_code" | b"corp_name" | b"stock_code" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(FetchError::Transport(format!("corp code table: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(corps)
}

/// Entity identifiers that are already corp codes.
pub fn is_corp_code(entity: &str) -> bool {
    entity.len() == 8 && entity.bytes().all(|b| b.is_ascii_digit())
}

/// Resolve a company name or six-digit stock code to its corp code.
///
/// Exact name matches win, listed companies before unlisted ones.
pub fn resolve<'a>(corps: &'a [CorpCode], entity: &str) -> Option<&'a CorpCode> {
    let wanted = entity.trim();
    let by_name: Vec<&CorpCode> = corps.iter().filter(|c| c.corp_name == wanted).collect();
    if let Some(listed) = by_name.iter().find(|c| c.stock_code.is_some()) {
        return Some(listed);
    }
    if let Some(first) = by_name.first() {
        return Some(first);
    }
    corps
        .iter()
        .find(|c| c.stock_code.as_deref() == Some(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<result>
    <list>
        <corp_code>00434003</corp_code>
        <corp_name>다코</corp_name>
        <stock_code> </stock_code>
        <modify_date>20170630</modify_date>
    </list>
    <list>
        <corp_code>00126380</corp_code>
        <corp_name>삼성전자</corp_name>
        <stock_code>005930</stock_code>
        <modify_date>20240101</modify_date>
    </list>
    <list>
        <corp_code>01234567</corp_code>
        <corp_name>삼성전자</corp_name>
        <stock_code></stock_code>
        <modify_date>20100101</modify_date>
    </list>
    <list>
        <corp_code>00999999</corp_code>
        <corp_name>A&amp;B 홀딩스</corp_name>
        <stock_code>123450</stock_code>
        <modify_date>20200101</modify_date>
    </list>
</result>"#;

    #[test]
    fn parses_table() {
        let corps = parse_corp_codes(TABLE).unwrap();
        assert_eq!(corps.len(), 4);
        assert_eq!(corps[0].corp_code, "00434003");
        assert_eq!(corps[0].corp_name, "다코");
        assert_eq!(corps[0].stock_code, None);
        assert_eq!(corps[1].stock_code.as_deref(), Some("005930"));
        assert_eq!(corps[3].corp_name, "A&B 홀딩스");
    }

    #[test]
    fn resolves_names_and_stock_codes() {
        let corps = parse_corp_codes(TABLE).unwrap();
        assert_eq!(resolve(&corps, "삼성전자").unwrap().corp_code, "00126380");
        assert_eq!(resolve(&corps, " 다코 ").unwrap().corp_code, "00434003");
        assert_eq!(resolve(&corps, "123450").unwrap().corp_code, "00999999");
        assert!(resolve(&corps, "없는회사").is_none());
    }

    #[test]
    fn corp_code_shape() {
        assert!(is_corp_code("00126380"));
        assert!(!is_corp_code("005930"));
        assert!(!is_corp_code("삼성전자"));
    }
}
