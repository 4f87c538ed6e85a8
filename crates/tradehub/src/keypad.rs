//! Button presses that type a link code on the in-game keypad.
//!
//! The keypad is a phone grid with `0` centred under the last row:
//!
//! ```text
//! 1 2 3
//! 4 5 6
//! 7 8 9
//!   0
//! ```
//!
//! The cursor starts on `1` and stays on the last digit typed.

use crate::code::LinkCode;
use crate::traits::Button;

/// Full press sequence for `code`, confirming each digit with `A`.
pub fn presses(code: LinkCode) -> Vec<Button> {
    let mut out = Vec::with_capacity(40);
    let mut cursor = 1u8;
    for digit in code.digits() {
        move_cursor(cursor, digit, &mut out);
        out.push(Button::A);
        cursor = digit;
    }
    out
}

fn move_cursor(from: u8, to: u8, out: &mut Vec<Button>) {
    if from == to {
        return;
    }
    if to == 0 {
        // Down from any column of the grid lands on 0.
        let row = (from - 1) / 3;
        out.extend(std::iter::repeat(Button::DDown).take(usize::from(3 - row)));
        return;
    }
    let from = if from == 0 {
        out.push(Button::DUp);
        8
    } else {
        from
    };
    move_in_grid(from, to, out);
}

fn move_in_grid(from: u8, to: u8, out: &mut Vec<Button>) {
    let (from_row, from_col) = ((from - 1) / 3, (from - 1) % 3);
    let (to_row, to_col) = ((to - 1) / 3, (to - 1) % 3);

    let vertical = if to_row > from_row { Button::DDown } else { Button::DUp };
    out.extend(std::iter::repeat(vertical).take(usize::from(to_row.abs_diff(from_row))));

    let horizontal = if to_col > from_col { Button::DRight } else { Button::DLeft };
    out.extend(std::iter::repeat(horizontal).take(usize::from(to_col.abs_diff(from_col))));
}
