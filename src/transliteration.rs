/// Whole-word and ligature spellings, matched before single letters. Longest first.
const COMBINATIONS: [(&str, &str); 9] = [
    ("بالله", "billah"),
    ("والله", "wallah"),
    ("تالله", "tallah"),
    ("الله", "Allah"),
    ("لله", "lillah"),
    ("لآ", "laa"),
    ("لا", "la"),
    ("لأ", "la"),
    ("لإ", "li"),
];

fn letter(c: char) -> Option<&'static str> {
    let latin = match c {
        'ا' | 'أ' | 'ٱ' | 'ى' => "a",
        'إ' => "i",
        'آ' => "aa",
        'ب' => "b",
        'ت' => "t",
        'ث' => "th",
        'ج' => "j",
        'ح' | 'ه' | 'ة' => "h",
        'خ' => "kh",
        'د' | 'ض' => "d",
        'ذ' | 'ظ' => "dh",
        'ر' => "r",
        'ز' => "z",
        'س' | 'ص' => "s",
        'ش' => "sh",
        'ط' => "t",
        'ع' | 'ء' => "'",
        'غ' => "gh",
        'ف' => "f",
        'ق' => "q",
        'ك' => "k",
        'ل' => "l",
        'م' => "m",
        'ن' => "n",
        'و' => "w",
        'ي' => "y",
        'ؤ' => "'w",
        'ئ' => "'y",
        '\u{64E}' => "a",
        '\u{64F}' => "u",
        '\u{650}' => "i",
        '\u{64B}' => "an",
        '\u{64C}' => "un",
        '\u{64D}' => "in",
        '\u{651}' | '\u{652}' => "",
        '،' => ",",
        '؛' => ";",
        ' ' => " ",
        '.' => ".",
        ',' => ",",
        '?' => "?",
        '!' => "!",
        _ => return None,
    };
    Some(latin)
}

/// Rule-based romanization. Characters outside the table are dropped and runs of
/// whitespace collapse to one space.
pub(crate) fn transliterate(arabic: &str) -> String {
    let chars: Vec<char> = arabic.chars().collect();
    let mut out = String::with_capacity(arabic.len());
    let mut i = 0;

    'outer: while i < chars.len() {
        for (pattern, latin) in COMBINATIONS {
            let len = pattern.chars().count();
            if i + len <= chars.len() && chars[i..i + len].iter().copied().eq(pattern.chars()) {
                out.push_str(latin);
                i += len;
                continue 'outer;
            }
        }
        if let Some(latin) = letter(chars[i]) {
            out.push_str(latin);
        } else if chars[i].is_whitespace() {
            out.push(' ');
        }
        i += 1;
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_combinations_win_over_letters() {
        assert_eq!(transliterate("الله"), "Allah");
        assert_eq!(transliterate("بالله"), "billah");
        assert_eq!(transliterate("لا"), "la");
    }

    #[test]
    fn vowels_and_sukun_are_spelled() {
        assert_eq!(transliterate("بِسْمِ"), "bismi");
        assert_eq!(transliterate("بِسْمِ الله"), "bismi Allah");
    }

    #[test]
    fn unknown_marks_drop_and_spaces_collapse() {
        assert_eq!(transliterate("قُلْ  \u{6DA}  هُوَ"), "qul huwa");
        assert_eq!(transliterate(""), "");
    }
}
