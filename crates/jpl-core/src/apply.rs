//! Immutable change application.
//!
//! Sources are shared `Rc`s. The first effective change clones the payload
//! through `Rc::make_mut`; later changes mutate that private copy. When no
//! change has an effect the source handle itself is returned.

use crate::jval::{JVal, Object};
use crate::mux::Combinations;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum ObjectChange {
    Set(String, JVal),
    Remove(String),
}

pub fn apply_object<I>(source: &Rc<Object>, changes: I) -> Rc<Object>
where
    I: IntoIterator<Item = ObjectChange>,
{
    let mut result = Rc::clone(source);
    for change in changes {
        match change {
            ObjectChange::Remove(key) => {
                if result.contains_key(&key) {
                    Rc::make_mut(&mut result).shift_remove(&key);
                }
            }
            ObjectChange::Set(key, value) => {
                if result.get(&key).is_some_and(|current| current.is_same(&value)) {
                    continue;
                }
                Rc::make_mut(&mut result).insert(key, value);
            }
        }
    }
    result
}

/// Set array slots by index. Negative indices count from the end; slots past
/// either end grow the array with `filler`.
pub fn apply_array<I>(source: &Rc<Vec<JVal>>, changes: I, filler: &JVal) -> Rc<Vec<JVal>>
where
    I: IntoIterator<Item = (isize, JVal)>,
{
    let mut result = Rc::clone(source);
    for (index, value) in changes {
        let len = result.len() as isize;
        let mut i = if index < 0 { len + index } else { index };
        if (0..len).contains(&i) && result[i as usize].is_same(&value) {
            continue;
        }
        let items = Rc::make_mut(&mut result);
        if i >= len {
            items.resize(i as usize + 1, filler.clone());
        } else if i < 0 {
            let missing = i.unsigned_abs();
            items.splice(0..0, std::iter::repeat(filler.clone()).take(missing));
            i = 0;
        }
        items[i as usize] = value;
    }
    result
}

/// One array per combination of `combinations` (one candidate list per slot),
/// in odometer order.
///
/// Every result starts from `source` cut or padded with `null` to one item per
/// slot. A combination equal to `source` yields `source` itself.
pub fn apply_combinations(
    source: &Rc<Vec<JVal>>,
    combinations: &[Vec<JVal>],
) -> Vec<Rc<Vec<JVal>>> {
    let width = combinations.len();
    let base = if source.len() == width {
        Rc::clone(source)
    } else {
        let mut items: Vec<JVal> = source.iter().take(width).cloned().collect();
        items.resize(width, JVal::Null);
        Rc::new(items)
    };
    Combinations::new(combinations)
        .map(|values| {
            let changes = values.into_iter().enumerate().map(|(i, value)| (i as isize, value));
            apply_array(&base, changes, &JVal::Null)
        })
        .collect()
}
