//! Pseudo-text corpus that string filler fields are sampled from

use rand::Rng;

/// Size of the corpus each synthesizer builds
pub const TEXT_BUFFER_LEN: usize = 1024 * 1024;

// Letters repeated roughly in proportion to English frequency.
const LETTERS_BY_FREQUENCY: &[u8] = b"\
eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee\
ttttttttttttttttttttttttt\
aaaaaaaaaaaaaaaaaaaaaa\
ooooooooooooooooooo\
iiiiiiiiiiiiiiiiiiiii\
nnnnnnnnnnnnnnnnnnnn\
ssssssssssssssssssss\
hhhhhhhhhhhhhhh\
rrrrrrrrrrrrrrrrrr\
ddddddddddddddd\
lllllllllll\
cccccccccc\
uuuuuuuuu\
mmmmmmmm\
wwwwwwww\
fffffff\
ggggggg\
yyyyyyyy\
ppppppp\
bbbbbb\
vvvvv\
kkk\
jj\
xx\
q\
z";

const DIGITS: &[u8] = b"0123456789";

const SENTENCE_EVERY: usize = 60;
const WORD_EVERY: usize = 6;

/// Generate `len` bytes of ASCII pseudo-text from `rng`
///
/// Every 60th position is a full stop, every 6th a space, and the first
/// character of each sentence is an upper-case letter.
pub fn generate_text<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    let mut out = String::with_capacity(len);
    let mut capitalize_next = true;
    let alphabet_len = LETTERS_BY_FREQUENCY.len() + DIGITS.len();

    for i in 0..len {
        if i > 0 && i % SENTENCE_EVERY == 0 {
            out.push('.');
            capitalize_next = true;
        } else if i > 0 && i % WORD_EVERY == 0 {
            out.push(' ');
        } else if capitalize_next {
            let c = LETTERS_BY_FREQUENCY[rng.gen_range(0..LETTERS_BY_FREQUENCY.len())];
            out.push(char::from(c.to_ascii_uppercase()));
            capitalize_next = false;
        } else {
            let pick = rng.gen_range(0..alphabet_len);
            let c = if pick < LETTERS_BY_FREQUENCY.len() {
                LETTERS_BY_FREQUENCY[pick]
            } else {
                DIGITS[pick - LETTERS_BY_FREQUENCY.len()]
            };
            out.push(char::from(c));
        }
    }

    out
}
