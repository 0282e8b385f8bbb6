use std::sync::OnceLock;

use regex::Regex;

const CLAUSE_BREAKS: [char; 6] = ['۔', '،', '؛', '.', ',', ';'];
const RTL_SEARCH_FRACTION: f64 = 0.8;
const LTR_MIN_FILL_FRACTION: f64 = 0.5;

pub(crate) const FATIHA_REFERENCE: &str = "1:1-7";

const FATIHA_ARABIC: [&str; 7] = [
    "بِسْمِ اللَّهِ الرَّحْمَٰنِ الرَّحِيمِ",
    "الْحَمْدُ لِلَّهِ رَبِّ الْعَالَمِينَ",
    "الرَّحْمَٰنِ الرَّحِيمِ",
    "مَالِكِ يَوْمِ الدِّينِ",
    "إِيَّاكَ نَعْبُدُ وَإِيَّاكَ نَسْتَعِينُ",
    "اهْدِنَا الصِّرَاطَ الْمُسْتَقِيمَ",
    "صِرَاطَ الَّذِينَ أَنْعَمْتَ عَلَيْهِمْ غَيْرِ الْمَغْضُوبِ عَلَيْهِمْ وَلَا الضَّالِّينَ",
];

const FATIHA_TRANSLATION_MARKERS: [(&str, &str); 7] = [
    ("In the name of", "."),
    ("[All] praise", "-"),
    ("The Entirely Merciful", ","),
    ("Sovereign", "."),
    ("It is You", "."),
    ("Guide us", "-"),
    ("The path", "astray."),
];

/// Splits `text` into display pages of at most `max_chars` characters.
///
/// Right-to-left text is cut at the first clause mark once a page is 80% full, or hard at the limit.
/// Left-to-right text is cut between words and prefers sentence ends once a page is half full;
/// a single word longer than the limit becomes a page of its own.
/// Always returns at least one page; blank input yields a single empty page.
pub(crate) fn paginate(text: &str, max_chars: usize, rtl: bool) -> Vec<String> {
    let max_chars = max_chars.max(1);
    if text.trim().is_empty() {
        return vec![String::new()];
    }

    let pages = if rtl {
        paginate_rtl(text, max_chars)
    } else {
        paginate_ltr(text, max_chars)
    };

    if pages.is_empty() {
        vec![text.trim().to_owned()]
    } else {
        pages
    }
}

fn paginate_rtl(text: &str, max_chars: usize) -> Vec<String> {
    let search_from = max_chars as f64 * RTL_SEARCH_FRACTION;
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;

    for c in text.chars() {
        current.push(c);
        count += 1;
        if count as f64 >= search_from && (CLAUSE_BREAKS.contains(&c) || count >= max_chars) {
            push_trimmed(&mut pages, &current);
            current.clear();
            count = 0;
        }
    }
    push_trimmed(&mut pages, &current);
    pages
}

fn paginate_ltr(text: &str, max_chars: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut pages = Vec::new();
    let mut current = String::new();

    for (i, word) in words.iter().enumerate() {
        let candidate_len = if current.is_empty() {
            char_len(word)
        } else {
            char_len(&current) + 1 + char_len(word)
        };

        if candidate_len > max_chars {
            if current.is_empty() {
                // Over-long word on an empty page stands alone.
                pages.push((*word).to_owned());
            } else {
                pages.push(std::mem::take(&mut current));
                current.push_str(word);
            }
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }

        let is_last = i + 1 == words.len();
        if !is_last
            && ends_sentence(&current)
            && char_len(&current) as f64 >= max_chars as f64 * LTR_MIN_FILL_FRACTION
        {
            pages.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

fn ends_sentence(page: &str) -> bool {
    let body = page.strip_suffix(['"', '\u{201D}']).unwrap_or(page);
    matches!(body.chars().last(), Some('.' | '!' | '?'))
}

fn push_trimmed(pages: &mut Vec<String>, chunk: &str) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        pages.push(trimmed.to_owned());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Pads the shorter list with empty pages so both have one entry per display slot.
pub(crate) fn equalize(arabic: &mut Vec<String>, translation: &mut Vec<String>) {
    let len = arabic.len().max(translation.len());
    arabic.resize(len, String::new());
    translation.resize(len, String::new());
}

/// Al-Fatiha is shown one verse per page. Marker matching is sensitive to text normalization;
/// when it does not find all seven verses the canonical split is used instead.
pub(crate) fn split_fatiha_arabic(text: &str) -> Vec<String> {
    let mut remaining = text.to_owned();
    let mut verses = Vec::with_capacity(FATIHA_ARABIC.len());
    for marker in FATIHA_ARABIC {
        if let Some(pos) = remaining.find(marker) {
            verses.push(marker.to_owned());
            remaining.replace_range(pos..pos + marker.len(), "");
            remaining = remaining.trim().to_owned();
        }
    }

    if verses.len() == FATIHA_ARABIC.len() {
        verses
    } else {
        FATIHA_ARABIC.iter().map(|v| (*v).to_owned()).collect()
    }
}

pub(crate) fn split_fatiha_translation(text: &str) -> Vec<String> {
    if !text.contains(FATIHA_TRANSLATION_MARKERS[0].0) {
        return split_into_sentence_groups(text, FATIHA_ARABIC.len());
    }

    let mut verses = Vec::with_capacity(FATIHA_ARABIC.len());
    let mut remaining = text;
    for (start_marker, end_marker) in FATIHA_TRANSLATION_MARKERS {
        let Some(start) = remaining.find(start_marker) else {
            continue;
        };
        match remaining[start..].find(end_marker) {
            Some(offset) => {
                let end = start + offset + end_marker.len();
                verses.push(remaining[start..end].trim().to_owned());
                remaining = remaining[end..].trim();
            }
            None => {
                verses.push(remaining[start..].trim().to_owned());
                break;
            }
        }
    }

    verses.resize(FATIHA_ARABIC.len(), String::new());
    verses
}

fn sentence_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"[.!?]+").expect("static sentence pattern"))
}

fn split_into_sentence_groups(text: &str, groups: usize) -> Vec<String> {
    let sentences: Vec<&str> = sentence_splitter()
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let per_group = (sentences.len() / groups).max(1);

    (0..groups)
        .map(|i| {
            let start = (i * per_group).min(sentences.len());
            let end = if i + 1 == groups {
                sentences.len()
            } else {
                (start + per_group).min(sentences.len())
            };
            let chunk = &sentences[start..end];
            if chunk.is_empty() {
                String::new()
            } else {
                format!("{}.", chunk.join(". "))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_of(pages: &[String]) -> Vec<String> {
        pages
            .iter()
            .flat_map(|p| p.split_whitespace().map(str::to_owned))
            .collect()
    }

    fn without_whitespace(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    const AYAT_AL_KURSI: &str = "ٱللَّهُ لَآ إِلَـٰهَ إِلَّا هُوَ ٱلْحَىُّ ٱلْقَيُّومُ ۚ لَا تَأْخُذُهُۥ سِنَةٌ وَلَا نَوْمٌ ۚ لَّهُۥ مَا فِى ٱلسَّمَـٰوَٰتِ وَمَا فِى ٱلْأَرْضِ ۗ مَن ذَا ٱلَّذِى يَشْفَعُ عِندَهُۥٓ إِلَّا بِإِذْنِهِۦ ۚ يَعْلَمُ مَا بَيْنَ أَيْدِيهِمْ وَمَا خَلْفَهُمْ";

    const KURSI_TRANSLATION: &str = "Allah! There is no deity except Him, the Ever-Living, the Sustainer of existence. Neither drowsiness overtakes Him nor sleep. To Him belongs whatever is in the heavens and whatever is on the earth. Who is it that can intercede with Him except by His permission? He knows what is before them and what will be after them.";

    #[test]
    fn empty_text_yields_one_empty_page() {
        assert_eq!(paginate("", 150, false), vec![String::new()]);
        assert_eq!(paginate("", 120, true), vec![String::new()]);
    }

    #[test]
    fn short_text_is_a_single_page() {
        assert_eq!(paginate("Say, He is Allah, One.", 150, false), vec!["Say, He is Allah, One."]);
    }

    #[test]
    fn ltr_pages_preserve_words_and_respect_limit() {
        for max in [20, 40, 80, 150] {
            let pages = paginate(KURSI_TRANSLATION, max, false);
            assert!(!pages.is_empty());
            assert_eq!(words_of(&pages), words_of(&[KURSI_TRANSLATION.to_owned()]));
            for page in &pages {
                let lone_word = !page.contains(' ');
                assert!(page.chars().count() <= max || lone_word, "{page:?} > {max}");
            }
        }
    }

    #[test]
    fn ltr_prefers_sentence_boundaries_when_half_full() {
        let pages = paginate(KURSI_TRANSLATION, 120, false);
        assert_eq!(
            pages[0],
            "Allah! There is no deity except Him, the Ever-Living, the Sustainer of existence."
        );
    }

    #[test]
    fn ltr_quoted_sentence_end_is_a_boundary() {
        let text = "He said, \"Indeed, the people have gathered.\" But it increased them in faith and certainty.";
        let pages = paginate(text, 60, false);
        assert_eq!(pages[0], "He said, \"Indeed, the people have gathered.\"");
    }

    #[test]
    fn overlong_word_becomes_its_own_page() {
        let pages = paginate("a Supercalifragilisticexpialidocious b", 10, false);
        assert_eq!(pages, vec!["a", "Supercalifragilisticexpialidocious", "b"]);
    }

    #[test]
    fn rtl_pages_reconstruct_text_and_respect_limit() {
        for max in [30, 60, 120] {
            let pages = paginate(AYAT_AL_KURSI, max, true);
            assert!(pages.len() >= 2);
            assert_eq!(
                without_whitespace(&pages.concat()),
                without_whitespace(AYAT_AL_KURSI)
            );
            for page in &pages {
                assert!(page.chars().count() <= max);
            }
        }
    }

    #[test]
    fn rtl_breaks_at_clause_mark_after_threshold() {
        let text = "كلمة كلمة كلمة كلمة، كلمة كلمة كلمة";
        let pages = paginate(text, 22, true);
        assert_eq!(pages[0], "كلمة كلمة كلمة كلمة،");
    }

    #[test]
    fn equalize_pads_the_shorter_side() {
        let mut arabic = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        let mut translation = vec!["x".to_owned()];
        equalize(&mut arabic, &mut translation);
        assert_eq!(translation, vec!["x", "", ""]);
        assert_eq!(arabic.len(), 3);
    }

    #[test]
    fn fatiha_splits_into_seven_verses() {
        let arabic = FATIHA_ARABIC.join(" ");
        let verses = split_fatiha_arabic(&arabic);
        assert_eq!(verses.len(), 7);
        assert_eq!(verses[3], "مَالِكِ يَوْمِ الدِّينِ");

        let fallback = split_fatiha_arabic("نص مختلف تماما");
        assert_eq!(fallback, FATIHA_ARABIC.map(str::to_owned).to_vec());
    }

    #[test]
    fn fatiha_translation_follows_markers() {
        let text = "In the name of Allah, the Entirely Merciful, the Especially Merciful. [All] praise is [due] to Allah, Lord of the worlds - The Entirely Merciful, the Especially Merciful, Sovereign of the Day of Recompense. It is You we worship and You we ask for help. Guide us to the straight path - The path of those upon whom You have bestowed favor, not of those who have evoked [Your] anger or of those who are astray.";
        let verses = split_fatiha_translation(text);
        assert_eq!(verses.len(), 7);
        assert_eq!(
            verses[0],
            "In the name of Allah, the Entirely Merciful, the Especially Merciful."
        );
        assert_eq!(verses[1], "[All] praise is [due] to Allah, Lord of the worlds -");
        assert_eq!(verses[4], "It is You we worship and You we ask for help.");
        assert!(verses[6].ends_with("astray."));
    }

    #[test]
    fn fatiha_translation_without_markers_groups_sentences() {
        let text = "One. Two. Three. Four. Five. Six. Seven. Eight.";
        let verses = split_fatiha_translation(text);
        assert_eq!(verses.len(), 7);
        assert_eq!(verses[0], "One.");
        assert_eq!(verses[6], "Seven. Eight.");
    }
}
