//! 渲染：固定的用户可见文案、管理员视图文本（HTML 转义）与按钮
//!
//! 文案为固定集合（俄语），不做国际化。

use serde::Serialize;

use crate::core::lifecycle::ActionToken;
use crate::core::order::{Order, OrderStatus};

pub const GREETING: &str = "Привет! 👋\n\
Отправьте мне текст вашего заказа — например: <b>«Хочу заказать визитки»</b>.\n\n\
Я передам запрос администратору и сообщу о статусе. 📨";

pub const ORDER_RECEIVED: &str = "Спасибо! 🙌 Ваш заказ отправлен администратору.\n\
Сообщу, когда его примут в работу. 📨";

pub const TEXT_ONLY: &str = "Пожалуйста, отправьте текст заказа 📝\n\
Например: <b>«Хочу заказать визитки»</b>.";

pub const ORDER_ACCEPTED: &str = "Ваш заказ принят в работу ✅\nМы приступили к выполнению!";
pub const ORDER_COMPLETED: &str = "Ваш заказ выполнен 🎉 Спасибо за обращение!";

// 按钮回执（仅按下者可见）
pub const ACK_OPERATOR_ONLY: &str = "Эта кнопка доступна только администратору.";
pub const ACK_NOT_FOUND: &str = "Этот заказ не найден или устарел.";
pub const ACK_ALREADY_CLOSED: &str = "Заказ уже закрыт.";
pub const ACK_ALREADY_IN_PROGRESS: &str = "Уже в работе.";
pub const ACK_ALREADY_DONE: &str = "Уже закрыт.";
pub const ACK_ACCEPT_FIRST: &str = "Сначала примите заказ в работу.";
pub const ACK_ACCEPTED: &str = "Заказ принят в работу.";
pub const ACK_COMPLETED: &str = "Заказ закрыт. Готово! ✅";
pub const ACK_INDICATOR: &str = "Это индикатор статуса.";

/// 内联按钮
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

/// 内联键盘（按行排列）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Keyboard {
    pub inline_keyboard: Vec<Vec<Button>>,
}

impl Keyboard {
    /// 所有按钮携带的动作令牌
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.callback_data.as_str())
    }
}

fn button(text: &str, token: &ActionToken) -> Button {
    Button {
        text: text.to_string(),
        callback_data: token.encode(),
    }
}

/// 当前状态下管理员视图的按钮；Done 返回 None（移除全部按钮）
pub fn keyboard_for(order: &Order) -> Option<Keyboard> {
    let row = match order.status {
        OrderStatus::New => vec![button(
            "✅ Принять в работу",
            &ActionToken::Accept(order.id.clone()),
        )],
        OrderStatus::InProgress => vec![
            button("⏳ В работе", &ActionToken::Indicator),
            button("🏁 Выполнено", &ActionToken::Complete(order.id.clone())),
        ],
        OrderStatus::Done => return None,
    };
    Some(Keyboard {
        inline_keyboard: vec![row],
    })
}

/// 状态图标与标签
pub fn status_label(status: OrderStatus) -> (&'static str, &'static str) {
    match status {
        OrderStatus::New => ("🆕", "Новый"),
        OrderStatus::InProgress => ("⏳", "В работе"),
        OrderStatus::Done => ("✅", "Закрыт"),
    }
}

/// 转义 HTML parse_mode 下的保留字符
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Telegram 单条消息的上限（实体解析后的可见字符数）
pub const MESSAGE_LIMIT: usize = 4096;

// 视图中订单原文与显示名的可见字符上限；其余固定部分不超过 200 字符
const VIEW_TEXT_LIMIT: usize = 3600;
const VIEW_NAME_LIMIT: usize = 256;

/// 按字符截断，超出部分以省略号代替（在转义之前调用）
pub fn truncate_chars(s: &str, limit: usize) -> std::borrow::Cow<'_, str> {
    match s.char_indices().nth(limit) {
        None => std::borrow::Cow::Borrowed(s),
        Some((cut, _)) => {
            let keep = s[..cut]
                .char_indices()
                .next_back()
                .map(|(i, _)| i)
                .unwrap_or(0);
            std::borrow::Cow::Owned(format!("{}…", &s[..keep]))
        }
    }
}

/// 管理员视图文本
///
/// 订单原文在注册表中逐字保存；这里只截断渲染结果，保证整条消息不超过 [`MESSAGE_LIMIT`]。
pub fn operator_view(order: &Order) -> String {
    let (icon, label) = status_label(order.status);
    format!(
        "<b>Заказ #{}</b>\n\
         👤 От: <code>{}</code> (ID: <code>{}</code>)\n\
         💬 Текст: <i>{}</i>\n\
         📌 Статус: {} <b>{}</b>",
        order.id,
        escape_html(&truncate_chars(&order.submitter_name, VIEW_NAME_LIMIT)),
        order.submitter_id,
        escape_html(&truncate_chars(&order.text, VIEW_TEXT_LIMIT)),
        icon,
        label
    )
}
