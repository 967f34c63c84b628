// SPDX-License-Identifier: GPL-3.0-or-later

//! RPC input assembly and output serialization (spec §4.5): query-string,
//! form-urlencoded body, and TSV body merge into one parameter map; outputs
//! serialize back to TSV with an auto-selected `colenc`.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;

use super::colenc::ColEnc;
use crate::error::KtError;
use crate::http::Request;

pub type Params = HashMap<String, Vec<u8>>;

/// Builds the merged parameter map for one RPC call (spec §4.5 "Inputs are
/// assembled by merging, in order, (a) query-string parameters, (b)
/// form-encoded body..., (c) TSV body...").
pub fn assemble_params(req: &Request) -> Result<Params, KtError> {
    let mut params = Params::new();
    merge_urlencoded(&req.query, &mut params);

    let content_type = req.header("content-type").unwrap_or("");
    let (media_type, colenc) = split_content_type(content_type);

    if media_type.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        let body = String::from_utf8_lossy(&req.body).into_owned();
        merge_urlencoded(&body, &mut params);
    } else if media_type.eq_ignore_ascii_case("text/tab-separated-values") {
        merge_tsv(&req.body, colenc, &mut params)?;
    }

    Ok(params)
}

fn split_content_type(content_type: &str) -> (&str, Option<ColEnc>) {
    let mut parts = content_type.split(';');
    let media_type = parts.next().unwrap_or("").trim();
    let colenc = parts.find_map(|attr| {
        let (k, v) = attr.trim().split_once('=')?;
        if k.eq_ignore_ascii_case("colenc") { ColEnc::from_attribute(v.trim()) } else { None }
    });
    (media_type, colenc)
}

fn merge_urlencoded(query: &str, params: &mut Params) {
    if query.is_empty() {
        return;
    }
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = url_decode_plus(key);
        let value = url_decode_plus(value);
        params.insert(key, value);
    }
}

fn url_decode_plus(s: &str) -> String {
    let replaced = s.replace('+', " ");
    percent_decode_str(&replaced).decode_utf8_lossy().into_owned()
}

fn merge_tsv(body: &[u8], colenc: Option<ColEnc>, params: &mut Params) -> Result<(), KtError> {
    let text = String::from_utf8_lossy(body);
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let (key_field, value_field) =
            line.split_once('\t').ok_or_else(|| KtError::Protocol(format!("malformed TSV line: {line}")))?;
        let (key, value) = match colenc {
            Some(enc) => (enc.decode(key_field)?, enc.decode(value_field)?),
            None => (key_field.as_bytes().to_vec(), value_field.as_bytes().to_vec()),
        };
        params.insert(String::from_utf8_lossy(&key).into_owned(), value);
    }
    Ok(())
}

/// Serializes RPC outputs to TSV, auto-selecting the encoding by scanning
/// for bytes outside printable ASCII (spec §4.5: "prefer base64 when any
/// control byte; url-encode otherwise"). Returns the body and the
/// `colenc` attribute to declare in the response content-type.
pub fn serialize_outputs(outputs: &[(String, Vec<u8>)]) -> (Vec<u8>, ColEnc) {
    let needs_base64 = outputs.iter().any(|(k, v)| has_control_byte(k.as_bytes()) || has_control_byte(v));
    let colenc = if needs_base64 { ColEnc::Base64 } else { ColEnc::UrlEncoded };

    let mut body = Vec::new();
    for (key, value) in outputs {
        body.extend_from_slice(colenc.encode(key.as_bytes()).as_bytes());
        body.push(b'\t');
        body.extend_from_slice(colenc.encode(value).as_bytes());
        body.push(b'\n');
    }
    (body, colenc)
}

fn has_control_byte(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| b < 0x20 || b == 0x7f)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::http::Method;

    fn request_with(query: &str, content_type: &str, body: &[u8]) -> Request {
        let mut headers = HashMap::new();
        if !content_type.is_empty() {
            headers.insert("content-type".to_string(), content_type.to_string());
        }
        Request {
            method: Method::Post,
            path: "/rpc/get".into(),
            query: query.into(),
            version_minor: 1,
            headers,
            body: body.to_vec(),
            keep_alive: true,
        }
    }

    #[test]
    fn query_string_parameters_are_merged() {
        let req = request_with("key=alpha&value=one", "", b"");
        let params = assemble_params(&req).unwrap();
        assert_eq!(params.get("key").unwrap(), b"alpha");
        assert_eq!(params.get("value").unwrap(), b"one");
    }

    #[test]
    fn form_body_overrides_query_string() {
        let req = request_with("key=old", "application/x-www-form-urlencoded", b"key=new");
        let params = assemble_params(&req).unwrap();
        assert_eq!(params.get("key").unwrap(), b"new");
    }

    #[test]
    fn plain_tsv_body_is_parsed() {
        let req = request_with("", "text/tab-separated-values", b"key\talpha\nvalue\tone\n");
        let params = assemble_params(&req).unwrap();
        assert_eq!(params.get("key").unwrap(), b"alpha");
        assert_eq!(params.get("value").unwrap(), b"one");
    }

    #[test]
    fn tsv_body_with_base64_colenc_is_decoded() {
        let key = ColEnc::Base64.encode(b"key");
        let value = ColEnc::Base64.encode(b"alpha value");
        let body = format!("{key}\t{value}\n");
        let req = request_with("", "text/tab-separated-values; colenc=B", body.as_bytes());
        let params = assemble_params(&req).unwrap();
        assert_eq!(params.get("key").unwrap(), b"alpha value");
    }

    #[test]
    fn output_with_control_byte_prefers_base64() {
        let outputs = vec![("value".to_string(), vec![0u8, 1, 2])];
        let (_, colenc) = serialize_outputs(&outputs);
        assert_eq!(colenc, ColEnc::Base64);
    }

    #[test]
    fn plain_ascii_output_uses_url_encoding() {
        let outputs = vec![("value".to_string(), b"hello".to_vec())];
        let (body, colenc) = serialize_outputs(&outputs);
        assert_eq!(colenc, ColEnc::UrlEncoded);
        assert_eq!(body, b"value\thello\n");
    }
}
