use crate::token::TokenKind;

/// Hand-written trie over the 16 reserved words, dispatching on the first
/// byte before falling back to an exact match on the remainder. This
/// mirrors how clox-family lexers avoid a full hash lookup for the common
/// case of a short, mostly-non-keyword identifier.
pub fn lookup(ident: &[u8]) -> Option<TokenKind> {
    match ident.first()? {
        b'a' => check_rest(ident, b"and", TokenKind::And),
        b'c' => check_rest(ident, b"class", TokenKind::Class),
        b'e' => check_rest(ident, b"else", TokenKind::Else),
        b'f' => {
            if ident.len() > 1 {
                match ident[1] {
                    b'a' => check_rest(ident, b"false", TokenKind::False),
                    b'o' => check_rest(ident, b"for", TokenKind::For),
                    b'u' => check_rest(ident, b"fun", TokenKind::Fun),
                    _ => None,
                }
            } else {
                None
            }
        }
        b'i' => check_rest(ident, b"if", TokenKind::If),
        b'n' => check_rest(ident, b"nil", TokenKind::Nil),
        b'o' => check_rest(ident, b"or", TokenKind::Or),
        b'p' => check_rest(ident, b"print", TokenKind::Print),
        b'r' => check_rest(ident, b"return", TokenKind::Return),
        b's' => check_rest(ident, b"super", TokenKind::Super),
        b't' => {
            if ident.len() > 1 {
                match ident[1] {
                    b'h' => check_rest(ident, b"this", TokenKind::This),
                    b'r' => check_rest(ident, b"true", TokenKind::True),
                    _ => None,
                }
            } else {
                None
            }
        }
        b'v' => check_rest(ident, b"var", TokenKind::Var),
        b'w' => check_rest(ident, b"while", TokenKind::While),
        _ => None,
    }
}

fn check_rest(ident: &[u8], full: &'static [u8], kind: TokenKind) -> Option<TokenKind> {
    if ident == full {
        Some(kind)
    } else {
        None
    }
}
